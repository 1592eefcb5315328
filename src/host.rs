//! Host Config - What a target environment supplies to the reconciler.
//!
//! The reconciler never creates or mutates host nodes itself; that is the work
//! loop's job. It only needs to translate host instances into the values
//! callers see, read the host clock, and ask the host to call back for
//! deferred work.

/// Host environment primitives.
pub trait HostConfig: 'static {
    /// A concrete renderable unit (element, widget, terminal cell block...).
    type Instance: Clone + PartialEq + 'static;

    /// The container a root (or portal) renders into.
    type Container: Clone + 'static;

    /// The value exposed to callers for a host instance.
    type PublicInstance;

    /// Translate an internal host instance into its public value.
    fn get_public_instance(&self, instance: &Self::Instance) -> Self::PublicInstance;

    /// Milliseconds on a monotonic host clock.
    fn now(&self) -> u64;

    /// Ask the host to call `Reconciler::perform_async_work` within `timeout_ms`.
    ///
    /// Hosts without a deferred queue may ignore this and flush explicitly.
    fn schedule_deferred_work(&self, timeout_ms: u64) {
        let _ = timeout_ms;
    }

    /// Cancel a previously requested deferred callback.
    fn cancel_deferred_work(&self) {}
}
