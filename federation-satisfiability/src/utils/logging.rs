/// This macro is a wrapper around `tracing::trace!` and should not be confused with our snapshot
/// testing. Its goal is to add the necessary context to logging statements so that external tools
/// can show how key data structures (validation states, graph paths, dead ends) evolve over the
/// course of a satisfiability validation.
///
/// There are two ways of creating a snapshot. The easiest is by passing the macro an identifier
/// for the value you'd like to take a snapshot of. This will tag the snapshot type with the type
/// name of the value, create data that is a JSON string using serde_json, and add the message
/// literal that you pass in. EX:
/// ```ignore
/// snapshot!(dead_ends, "recorded dead ends");
/// // Generates:
/// // trace!(snapshot = "Unadvanceables", data = "{ .. }", "recorded dead ends");
/// ```
/// If you do not want to serialize the data, you can pass the name tag for the snapshot and data
/// in directly. Note that the data needs to implement the tracing crate's `Value` trait. Ideally,
/// this is a string representation of the data you're snapshotting. EX:
/// ```ignore
/// snapshot!("ValidationState", state.to_string(), "popped validation state");
/// // Generates:
/// // trace!(snapshot = "ValidationState", data = state.to_string(), "popped validation state");
/// ```
macro_rules! snapshot {
    ($value:expr, $msg:literal) => {
        #[cfg(feature = "snapshot_tracing")]
        tracing::trace!(
            snapshot = std::any::type_name_of_val(&$value),
            data = serde_json::to_string(&$value).unwrap_or_default(),
            $msg
        );
    };
    ($name:literal, $value:expr, $msg:literal) => {
        #[cfg(feature = "snapshot_tracing")]
        tracing::trace!(snapshot = $name, data = $value, $msg);
    };
}

pub(crate) use snapshot;
