//! Read-only data sources.

pub mod ip_access_list;
