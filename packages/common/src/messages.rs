use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mq::Message;

/// Ask the compile stage to build one submission.
///
/// The payload is deliberately just an identifier; the stage loads the
/// submission record itself so a redelivered message is always handled
/// against current state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompileJob {
    /// Job identifier (UUID).
    pub job_id: String,
    /// Server-assigned submission filename.
    pub filename: String,
}

impl CompileJob {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            filename: filename.into(),
        }
    }
}

impl Message for CompileJob {
    fn message_type() -> &'static str {
        "compile_job"
    }

    fn message_id(&self) -> &str {
        &self.job_id
    }
}

/// Ask the execute stage to grade one successfully compiled submission.
/// Published by the compile stage only after the compile record is
/// persisted, which is what orders compile before execute.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecuteJob {
    /// Job identifier (UUID).
    pub job_id: String,
    /// Server-assigned submission filename.
    pub filename: String,
}

impl ExecuteJob {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            filename: filename.into(),
        }
    }
}

impl Message for ExecuteJob {
    fn message_type() -> &'static str {
        "execute_job"
    }

    fn message_id(&self) -> &str {
        &self.job_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_unique() {
        let a = CompileJob::new("s1.cpp");
        let b = CompileJob::new("s1.cpp");
        assert_ne!(a.job_id, b.job_id);
    }

    #[test]
    fn test_message_roundtrip() {
        let job = ExecuteJob::new("s1.cpp");
        let json = serde_json::to_string(&job).unwrap();
        let parsed: ExecuteJob = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.filename, "s1.cpp");
        assert_eq!(parsed.message_id(), job.job_id);
    }
}
