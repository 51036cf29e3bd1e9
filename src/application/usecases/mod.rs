pub mod archive_sequence_replies;
pub mod record_events;
pub mod run_delivery_pass;
pub mod sequence_status;
