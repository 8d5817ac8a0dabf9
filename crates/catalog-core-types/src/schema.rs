//! Canonical field keys and event names for structured logging.

pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_REQUEST_ID: &str = "request_id";

// Ledger identifiers
pub const FIELD_CHANGE_SET_ID: &str = "change_set_id";
pub const FIELD_CHANGE_ID: &str = "change_id";
pub const FIELD_SUBMITTER: &str = "submitter";

// Catalog identifiers
pub const FIELD_ENTITY_TYPE: &str = "entity_type";
pub const FIELD_ENTITY_ID: &str = "entity_id";
pub const FIELD_NODE_ID: &str = "node_id";

// Collection sizes
pub const FIELD_NODE_COUNT: &str = "node_count";
pub const FIELD_CHANGE_COUNT: &str = "change_count";

// Error fields
pub const FIELD_ERR_KIND: &str = "err_kind";
pub const FIELD_ERR_CODE: &str = "err_code";

// Event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
