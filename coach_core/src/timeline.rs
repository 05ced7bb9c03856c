//! Timeline builder.
//!
//! Turns a session definition (plus an optional per-occurrence override)
//! into the ordered steps the athlete walks through:
//! PLANNING -> WARMUP* -> WORK (one per module) -> SUMMARY.
//!
//! The builder is pure: no I/O, no errors. Missing configuration is left to
//! the module accessors, which fall back to safe defaults.

use crate::{Module, Protocol, Session, SessionOverride, TimelineStep};

/// Build the timeline for one session attempt
pub fn build_timeline(session: &Session, session_override: Option<&SessionOverride>) -> Vec<TimelineStep> {
    let modules: Vec<Module> = session
        .modules
        .iter()
        .enumerate()
        .map(|(idx, module)| match session_override {
            Some(ov) if targets_module(ov, module, idx) => apply_override(module, ov),
            _ => module.clone(),
        })
        .collect();

    let mut steps = Vec::with_capacity(modules.len() + session.warmup.len() + 2);
    steps.push(TimelineStep::Planning {
        modules: modules.clone(),
    });
    steps.extend(session.warmup.iter().cloned().map(TimelineStep::Warmup));
    steps.extend(
        modules
            .into_iter()
            .enumerate()
            .map(|(module_index, module)| TimelineStep::Work {
                module_index,
                module,
            }),
    );
    steps.push(TimelineStep::Summary);

    tracing::debug!(
        "Built timeline for session {} with {} steps",
        session.id,
        steps.len()
    );
    steps
}

fn targets_module(ov: &SessionOverride, module: &Module, index: usize) -> bool {
    match ov.module_stable_id.as_deref() {
        Some(stable_id) => module.stable_id == stable_id,
        None => index == 0,
    }
}

/// Merge an override into a copy of the module
pub fn apply_override(module: &Module, ov: &SessionOverride) -> Module {
    let mut merged = module.clone();

    if let Some(minutes) = ov.duration_minutes.filter(|m| *m > 0) {
        merged.config.time_cap_seconds = Some(minutes * 60);
        merged.config.emom_minutes = Some(minutes);
        // A fixed-duration occurrence always runs as a time-capped block
        merged.protocol = Protocol::TimeCap;
    }

    if let Some(km) = ov.distance_km.filter(|km| *km > 0.0) {
        let slot = match merged
            .exercises
            .iter()
            .position(|e| e.target.reps().is_some() || e.volume_km.is_some())
        {
            Some(idx) => merged.exercises.get_mut(idx),
            None => merged.exercises.first_mut(),
        };
        if let Some(slot) = slot {
            slot.volume_km = Some(km);
        }
    }

    if let Some(notes) = ov.notes.as_ref().filter(|n| !n.trim().is_empty()) {
        merged.config.instruction = Some(notes.clone());
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Exercise, ExerciseTarget, ModuleConfig, StepKind, WarmupBlock};

    fn exercise(id: &str, target: ExerciseTarget) -> Exercise {
        Exercise {
            id: id.into(),
            stable_id: format!("s_{}", id),
            name: id.into(),
            loadable: true,
            target,
            energy: false,
            volume_km: None,
            instruction: None,
        }
    }

    fn module(id: &str, protocol: Protocol) -> Module {
        Module {
            id: id.into(),
            stable_id: format!("s_{}", id),
            name: format!("BUILD {}", id),
            protocol,
            exercises: vec![
                exercise("squat", ExerciseTarget::Reps(10)),
                exercise("row", ExerciseTarget::Reps(12)),
            ],
            config: ModuleConfig {
                time_cap_seconds: Some(300),
                emom_minutes: Some(6),
                instruction: None,
            },
        }
    }

    fn session() -> Session {
        Session {
            id: "sess".into(),
            name: "Test".into(),
            description: String::new(),
            pure_cardio: false,
            warmup: vec![WarmupBlock {
                title: "Mobility".into(),
                instructions: vec!["Hip openers".into()],
                duration_seconds: Some(300),
            }],
            modules: vec![module("a", Protocol::Emom), module("b", Protocol::ForTime)],
        }
    }

    #[test]
    fn test_step_order() {
        let steps = build_timeline(&session(), None);
        let kinds: Vec<StepKind> = steps.iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::Planning,
                StepKind::Warmup,
                StepKind::Work,
                StepKind::Work,
                StepKind::Summary
            ]
        );
        match &steps[0] {
            TimelineStep::Planning { modules } => assert_eq!(modules.len(), 2),
            other => panic!("expected planning, got {:?}", other),
        }
    }

    #[test]
    fn test_duration_override_forces_time_cap_on_emom() {
        let ov = SessionOverride {
            duration_minutes: Some(20),
            ..Default::default()
        };
        let steps = build_timeline(&session(), Some(&ov));
        let first = steps[2].work_module().unwrap();
        assert_eq!(first.protocol, Protocol::TimeCap);
        assert_eq!(first.time_cap_seconds(), 1200);
        assert_eq!(first.config.emom_minutes, Some(20));

        // Untargeted module is untouched
        let second = steps[3].work_module().unwrap();
        assert_eq!(second.protocol, Protocol::ForTime);
        assert_eq!(second.time_cap_seconds(), 300);
    }

    #[test]
    fn test_override_targets_module_by_stable_id() {
        let ov = SessionOverride {
            module_stable_id: Some("s_b".into()),
            notes: Some("Keep it conversational".into()),
            distance_km: Some(5.0),
            ..Default::default()
        };
        let steps = build_timeline(&session(), Some(&ov));
        let b = steps[3].work_module().unwrap();
        assert_eq!(b.config.instruction.as_deref(), Some("Keep it conversational"));
        assert_eq!(b.exercises[0].volume_km, Some(5.0));
        assert_eq!(b.exercises[1].volume_km, None);
        assert!(steps[2].work_module().unwrap().config.instruction.is_none());
    }

    #[test]
    fn test_builder_is_deterministic() {
        let ov = SessionOverride {
            duration_minutes: Some(12),
            ..Default::default()
        };
        assert_eq!(
            build_timeline(&session(), Some(&ov)),
            build_timeline(&session(), Some(&ov))
        );
    }

    #[test]
    fn test_empty_session_still_has_planning_and_summary() {
        let mut s = session();
        s.modules.clear();
        s.warmup.clear();
        let steps = build_timeline(&s, None);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1], TimelineStep::Summary);
    }
}
