pub mod daily_node_rollup;
pub mod session_record;
pub mod usage_event;

#[cfg(test)]
pub(crate) mod test_utils;
