use std::str::FromStr;

/// The engine's six log levels. Distinct from `tracing::Level`: `critical`
/// and `message` have no standard-library equivalent, so both map onto
/// `tracing`'s ERROR/INFO tiers with a `critical` field to distinguish a
/// fatal-invariant report from an ordinary error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Critical,
    Warning,
    Message,
    Info,
    Debug,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Critical => "critical",
            Level::Warning => "warning",
            Level::Message => "message",
            Level::Info => "info",
            Level::Debug => "debug",
        }
    }

    /// The `tracing::Level` this maps onto for filtering purposes.
    pub fn tracing_level(self) -> tracing::Level {
        match self {
            Level::Error | Level::Critical => tracing::Level::ERROR,
            Level::Warning => tracing::Level::WARN,
            Level::Message | Level::Info => tracing::Level::INFO,
            Level::Debug => tracing::Level::DEBUG,
        }
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Level::Error),
            "critical" => Ok(Level::Critical),
            "warning" => Ok(Level::Warning),
            "message" => Ok(Level::Message),
            "info" => Ok(Level::Info),
            "debug" => Ok(Level::Debug),
            other => Err(format!(
                "unknown log level '{other}', expected one of error, critical, warning, message, info, debug"
            )),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_level() {
        for s in ["error", "critical", "warning", "message", "info", "debug"] {
            assert_eq!(s.parse::<Level>().unwrap().as_str(), s);
        }
    }

    #[test]
    fn rejects_unknown_level() {
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn ordering_runs_from_error_to_debug() {
        assert!(Level::Error < Level::Critical);
        assert!(Level::Critical < Level::Warning);
        assert!(Level::Debug > Level::Info);
    }
}
