/// Identifier grouping the messages of one conversation.
/// Example: `t1_c8xk2pq`
pub type ConversationId = String;
/// Identifier of a single message, unique within its conversation.
/// Example: `c8xm0aa`
pub type MessageId = String;
/// Identifier of a human rater, as listed in the rater registry.
/// Examples: `alice`, `r1`
pub type RaterId = String;
/// Handle of a rater's writable sheet.
/// Examples: `https://docs.google.com/spreadsheets/d/...`, `sheets/alice.csv`
pub type SheetAddress = String;
/// Raw cell text read from or written to a sheet.
/// Example: `Yes - Direct Content`
pub type CellText = String;
/// One-based sheet row number.
pub type RowNumber = u32;
/// Name of a numeric corpus column carried as metadata.
/// Examples: `dataset_numeric`, `conversation_length`
pub type FeatureName = String;
