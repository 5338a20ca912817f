/// CSV file and directory backed corpus source.
pub mod csv_source;
