//! Wire message variants and the in-flight envelope wrapper.

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;

/// A task's serialized payload. Opaque to the bus and network; only task
/// bodies and collaborators interpret it.
pub type TaskPayload = serde_json::Value;

/// A task's computed result. Opaque to the bus; task bodies produce it and
/// the caller-facing `Promise` carries it back out.
pub type TaskValue = serde_json::Value;

/// Tagged message exchanged between peers on the [`crate::bus::MessageBus`].
///
/// Every variant the spec requires is represented: task submission/result,
/// worker registration, and the object-store request/response set (carried
/// only as a wire contract — no object-store handler ships in this crate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Dispatch a task to a worker.
    SubmitTask {
        /// Unique task identifier.
        task_id: u64,
        /// Owning stage.
        stage_id: u64,
        /// Partition the task operates on.
        partition_id: usize,
        /// Opaque task payload (task body closures are looked up locally by
        /// `task_id`; this field exists for wire fidelity with collaborators
        /// that serialize task descriptions).
        task_payload: TaskPayload,
    },

    /// Report a task's outcome back to the scheduler.
    TaskResult {
        /// Task this result is for.
        task_id: u64,
        /// Owning stage.
        stage_id: u64,
        /// Success value, if the task succeeded.
        result: Option<TaskValue>,
        /// Failure description, if the task failed.
        error: Option<String>,
    },

    /// Announce a worker's availability to the scheduler.
    WorkerRegistration {
        /// Unique worker identifier.
        worker_id: u64,
        /// Endpoint the worker listens on.
        endpoint: Endpoint,
        /// Advisory core count (execution is single-threaded in simulation).
        num_cores: u32,
    },

    /// Fetch an object's full contents.
    GetObject {
        /// Object key.
        key: String,
    },
    /// Response to [`Message::GetObject`].
    GetObjectResponse {
        /// Correlates with the request.
        correlation_id: String,
        /// Whether the fetch succeeded.
        success: bool,
        /// Object bytes, present on success.
        data: Option<Vec<u8>>,
        /// Error description, present on failure.
        error: Option<String>,
    },

    /// Write an object's full contents.
    PutObject {
        /// Object key.
        key: String,
        /// Object bytes.
        data: Vec<u8>,
    },
    /// Response to [`Message::PutObject`].
    PutObjectResponse {
        /// Correlates with the request.
        correlation_id: String,
        /// Whether the write succeeded.
        success: bool,
        /// Error description, present on failure.
        error: Option<String>,
    },

    /// Delete an object.
    DeleteObject {
        /// Object key.
        key: String,
    },
    /// Response to [`Message::DeleteObject`].
    DeleteObjectResponse {
        /// Correlates with the request.
        correlation_id: String,
        /// Whether the delete succeeded.
        success: bool,
        /// Error description, present on failure.
        error: Option<String>,
    },

    /// List objects under a prefix.
    ListObjects {
        /// Key prefix to list.
        prefix: String,
    },
    /// Response to [`Message::ListObjects`].
    ListObjectsResponse {
        /// Correlates with the request.
        correlation_id: String,
        /// Whether the listing succeeded.
        success: bool,
        /// Matching keys, present on success.
        keys: Option<Vec<String>>,
        /// Error description, present on failure.
        error: Option<String>,
    },

    /// Fetch a byte range of an object.
    GetObjectRange {
        /// Object key.
        key: String,
        /// Inclusive start offset.
        start: u64,
        /// Exclusive end offset.
        end: u64,
    },
    /// Response to [`Message::GetObjectRange`].
    GetObjectRangeResponse {
        /// Correlates with the request.
        correlation_id: String,
        /// Whether the fetch succeeded.
        success: bool,
        /// Range bytes, present on success.
        data: Option<Vec<u8>>,
        /// Error description, present on failure.
        error: Option<String>,
    },

    /// Fetch an object's size without reading its contents.
    GetObjectSize {
        /// Object key.
        key: String,
    },
    /// Response to [`Message::GetObjectSize`].
    GetObjectSizeResponse {
        /// Correlates with the request.
        correlation_id: String,
        /// Whether the lookup succeeded.
        success: bool,
        /// Size in bytes, present on success.
        size: Option<u64>,
        /// Error description, present on failure.
        error: Option<String>,
    },
}

impl Message {
    /// Stable variant name for logging, independent of payload contents.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SubmitTask { .. } => "SubmitTask",
            Self::TaskResult { .. } => "TaskResult",
            Self::WorkerRegistration { .. } => "WorkerRegistration",
            Self::GetObject { .. } => "GetObject",
            Self::GetObjectResponse { .. } => "GetObjectResponse",
            Self::PutObject { .. } => "PutObject",
            Self::PutObjectResponse { .. } => "PutObjectResponse",
            Self::DeleteObject { .. } => "DeleteObject",
            Self::DeleteObjectResponse { .. } => "DeleteObjectResponse",
            Self::ListObjects { .. } => "ListObjects",
            Self::ListObjectsResponse { .. } => "ListObjectsResponse",
            Self::GetObjectRange { .. } => "GetObjectRange",
            Self::GetObjectRangeResponse { .. } => "GetObjectRangeResponse",
            Self::GetObjectSize { .. } => "GetObjectSize",
            Self::GetObjectSizeResponse { .. } => "GetObjectSizeResponse",
        }
    }
}

/// Delivery state of an in-flight [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeStatus {
    /// Queued, awaiting delivery or drop.
    Pending,
    /// Delivered to its destination handler.
    Delivered,
    /// Dropped by the network before delivery.
    Dropped,
}

/// An in-flight message with scheduling metadata.
///
/// Created by [`crate::bus::MessageBus::send`], removed from the network's
/// queue on delivery or drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The carried message.
    pub message: Message,
    /// Sender endpoint.
    pub source: Endpoint,
    /// Recipient endpoint.
    pub destination: Endpoint,
    /// Monotonic send-order identifier, assigned by the bus.
    pub sequence_no: u64,
    /// Tick at which `send` was called.
    pub send_tick: u64,
    /// Tick at which this envelope becomes eligible for delivery.
    pub deliver_tick: u64,
    /// Current lifecycle state.
    pub status: EnvelopeStatus,
    /// Optional request/response correlation id, propagated from the
    /// message payload when present (object-store request/response pairs
    /// carry their own `correlation_id` field; this mirrors it for
    /// envelope-level inspection without re-matching on the message).
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Stable variant name of the carried message, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.message.kind()
    }
}
