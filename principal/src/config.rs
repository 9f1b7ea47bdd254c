/// Planner-tunable knobs. Unlike `VolumeSchedulerConfig` in an online
/// volume manager, nothing here changes scheduling *outcomes* — the
/// planner's semantics are fully pinned by the constraint/ranking rules.
/// This only controls how much detail is retained for diagnostics.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// When true (the default), `SchedulingReport`s retain every
    /// constraint's pass/fail reason per machine. When false, only the
    /// first failing reason per machine is kept, trading detail for a
    /// smaller report on very large clusters.
    pub verbose_reports: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { verbose_reports: true }
    }
}
