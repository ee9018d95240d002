mod db;

pub use db::{default_data_dir, flatten_summary, parse_message_date, Database};
