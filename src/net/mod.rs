//! Per-descriptor accept/read bookkeeping for `evio`.

mod conn;
pub(crate) use conn::{Conn, Transition};
