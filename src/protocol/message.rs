use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::users::MultiuserJob;

/// Status code of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Status {
    Ok,
    /// No free cores, no matching node, unknown job, divergent job lists
    SoftFailure,
    /// Policy rejection, e.g. a user not in the allowed list
    Rejected,
    /// Unknown user or bad connection key
    UnknownUser,
    InternalError,
    Fatal,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::SoftFailure => 1,
            Status::Rejected => 2,
            Status::UnknownUser => -1,
            Status::InternalError => -2,
            Status::Fatal => -10,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl TryFrom<i32> for Status {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Status::Ok),
            1 => Ok(Status::SoftFailure),
            2 => Ok(Status::Rejected),
            -1 => Ok(Status::UnknownUser),
            -2 => Ok(Status::InternalError),
            -10 => Ok(Status::Fatal),
            other => Err(format!("unknown status code {}", other)),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Requests a master (or the admin CLI) can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "args", rename_all = "snake_case")]
pub enum Request {
    SyncUser {
        user: String,
        address: String,
        port: u16,
        conn_key: String,
        cur_jobs: Vec<MultiuserJob>,
    },
    RequestCore {
        user: String,
        job_id: u64,
        n_cores: u32,
        mem: f64,
        queue_size: u32,
        #[serde(default)]
        node_attr: Vec<String>,
    },
    RemoveJob {
        user: String,
        job_id: u64,
        queue_size: u32,
    },
    ReloadNodes,
    Redistribute,
    ShowStatus,
    ShowVariables,
    SaveMessages(bool),
    Finish,
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::SyncUser { .. } => "sync_user",
            Request::RequestCore { .. } => "request_core",
            Request::RemoveJob { .. } => "remove_job",
            Request::ReloadNodes => "reload_nodes",
            Request::Redistribute => "redistribute",
            Request::ShowStatus => "show_status",
            Request::ShowVariables => "show_variables",
            Request::SaveMessages(_) => "save_messages",
            Request::Finish => "finish",
        }
    }
}

/// One request frame: the shared key and the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub key: String,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub message: String,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
        }
    }

    pub fn from_error(err: &BrokerError) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
        }
    }
}
