/// Queuing discipline selecting which socket's packet goes out next on an
/// egress tick (spec.md §4.3; CLI flag `--interface-qdisc fifo|rr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDiscipline {
    /// Sockets are served strictly in enqueue order.
    Fifo,
    /// Each serving round picks the next socket modulo a cursor.
    RoundRobin,
}

impl Default for QueueDiscipline {
    fn default() -> Self {
        QueueDiscipline::Fifo
    }
}

impl std::str::FromStr for QueueDiscipline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(QueueDiscipline::Fifo),
            "rr" => Ok(QueueDiscipline::RoundRobin),
            other => Err(format!("unknown queuing discipline '{other}', expected 'fifo' or 'rr'")),
        }
    }
}
