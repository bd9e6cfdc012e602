//! Metric names emitted through the [`metrics`](::metrics) facade.
//!
//! Every metric carries a `store` label of the form `<platform>/<store id>`.
//! Installing a recorder is up to the embedding process; without one, the
//! macros are no-ops.

use ::metrics::{Unit, describe_counter, describe_histogram};

pub const CACHE_HITS: &str = "emojifs_cache_hits_total";
pub const CACHE_MISSES: &str = "emojifs_cache_misses_total";
pub const STORE_LIST_DURATION: &str = "emojifs_store_list_duration_seconds";
pub const STORE_LIST_ERRORS: &str = "emojifs_store_list_errors_total";
pub const STORE_FETCHES: &str = "emojifs_store_fetches_total";
pub const STORE_CREATES: &str = "emojifs_store_creates_total";
pub const STORE_DELETES: &str = "emojifs_store_deletes_total";

/// Registers descriptions for every metric with the installed recorder.
pub fn describe() {
    describe_counter!(
        CACHE_HITS,
        "Directory listings served from a store's cached snapshot"
    );
    describe_counter!(
        CACHE_MISSES,
        "Directory listings that had to wait for a store listing"
    );
    describe_histogram!(
        STORE_LIST_DURATION,
        Unit::Seconds,
        "Time taken to list a store"
    );
    describe_counter!(STORE_LIST_ERRORS, "Store listings that failed");
    describe_counter!(STORE_FETCHES, "Emoji fetched from a store");
    describe_counter!(STORE_CREATES, "Emoji uploaded to a store");
    describe_counter!(STORE_DELETES, "Emoji deleted from a store");
}
