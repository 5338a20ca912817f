/// Constants describing the rater sheet layout.
pub mod sheet {
    use crate::types::RowNumber;

    /// Number of header rows above the first data row.
    pub const HEADER_ROWS: RowNumber = 2;
    /// First row that carries a message.
    pub const FIRST_DATA_ROW: RowNumber = HEADER_ROWS + 1;
    /// Column holding the conversation id.
    pub const CONVERSATION_COL: &str = "A";
    /// Column holding the message id; used to locate rows during reconciliation.
    pub const MESSAGE_COL: &str = "B";
    /// Column holding the speaker name.
    pub const SPEAKER_COL: &str = "C";
    /// Column holding the message text.
    pub const TEXT_COL: &str = "D";
    /// Header row written to fresh local sheets.
    pub const HEADER: [&str; 8] = [
        "conversation_id",
        "message_id",
        "speaker",
        "text",
        "directness_content",
        "directness_expression",
        "oi_content",
        "oi_expression",
    ];
    /// File suffix of the sidecar holding choice constraints for local sheets.
    pub const CONSTRAINTS_SUFFIX: &str = ".constraints.json";
}

/// Constants used by the allocation log file.
pub mod log {
    /// Column carrying the conversation id.
    pub const COL_CONVERSATION: &str = "conversation_id";
    /// Column carrying the message id.
    pub const COL_MESSAGE: &str = "message_id";
    /// Column carrying the rater id.
    pub const COL_RATER: &str = "rater_id";
    /// Column carrying the entry status.
    pub const COL_STATUS: &str = "status";
    /// Column carrying the RFC 3339 update time.
    pub const COL_UPDATED: &str = "last_updated_time";
    /// Status value for entries handed out but not fully rated.
    pub const STATUS_ALLOCATED: &str = "allocated";
    /// Status value for fully rated entries.
    pub const STATUS_DONE: &str = "done";
    /// Default log file name.
    pub const DEFAULT_LOG_FILENAME: &str = "conversation_labeling_log.csv";
}

/// Constants used by the corpus loader.
pub mod corpus {
    /// Accepted header names for the conversation id column.
    pub const CONVERSATION_HEADERS: [&str; 2] = ["conversation_id", "CONV_ID"];
    /// Accepted header names for the message id column.
    pub const MESSAGE_HEADERS: [&str; 2] = ["message_id", "MSG_ID"];
    /// Header name for the speaker column.
    pub const SPEAKER_HEADER: &str = "speaker";
    /// Header name for the text column.
    pub const TEXT_HEADER: &str = "text";
    /// File extension picked up when the corpus path is a directory.
    pub const CSV_EXTENSION: &str = "csv";
    /// Log message used when a corpus row cannot be parsed.
    pub const SKIP_MALFORMED_MSG: &str = "skipping malformed corpus row";
    /// Id prefix for feature-table rows without a conversation id column.
    pub const ROW_ID_PREFIX: &str = "row";
}

/// Constants used by the length-balancing tool.
pub mod balance {
    /// Metadata column separating winning (1) from awry (0) conversations.
    pub const DATASET_FEATURE: &str = "dataset_numeric";
    /// Value of `DATASET_FEATURE` marking winning conversations.
    pub const WINNING_VALUE: f64 = 1.0;
    /// Value of `DATASET_FEATURE` marking awry conversations.
    pub const AWRY_VALUE: f64 = 0.0;
    /// Default feature balanced by the CLI.
    pub const DEFAULT_FEATURE: &str = "conversation_length";
}

/// Constants used by sheet request pacing.
pub mod pacing {
    /// Default pause between consecutive sheet requests, in milliseconds.
    pub const DEFAULT_REQUEST_INTERVAL_MS: u64 = 1_000;
    /// Default initial backoff after a rate-limit response, in milliseconds.
    pub const DEFAULT_BACKOFF_MS: u64 = 5_000;
    /// Default number of retries after rate-limit responses before giving up.
    pub const DEFAULT_MAX_RETRIES: u32 = 4;
}

/// Constants shared by session configuration.
pub mod session {
    /// Default seed for the global conversation order.
    pub const DEFAULT_SEED: u64 = 42;
    /// Default rater registry file.
    pub const DEFAULT_REGISTRY_FILENAME: &str = "raters.json";
}
