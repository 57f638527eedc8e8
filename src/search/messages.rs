/// Messages a worker sends to the master over its own channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// The worker hit an error and stopped.
    Error(String),
    /// Number of entries in the database the worker opened.
    DatabaseCount(u64),
    /// One more spectrum searched.
    Progress,
    /// The partial result file is complete.
    Done,
}
