//! The collaborator receiving finished samples.

/// Consumes immutable samples of type `S`.
///
/// Transforms are shared between samplers and are expected to return
/// quickly, typically after aggregating the sample into in-memory counters.
/// Any `Fn(S) + Send + Sync` closure is a transformer.
///
/// # Example
///
/// ```rust
/// use runtime_samplers::protocol::ImmutableMemorySample;
/// use runtime_samplers::SampleTransformer;
///
/// struct WorkingSetLogger;
///
/// impl SampleTransformer<ImmutableMemorySample> for WorkingSetLogger {
///     fn transform(&self, sample: ImmutableMemorySample) {
///         println!("working set: {}", sample.working_set_bytes);
///     }
/// }
/// ```
pub trait SampleTransformer<S>: Send + Sync + 'static {
    /// Handles one sample.
    fn transform(&self, sample: S);
}

impl<S, F> SampleTransformer<S> for F
where
    F: Fn(S) + Send + Sync + 'static,
{
    fn transform(&self, sample: S) {
        self(sample)
    }
}
