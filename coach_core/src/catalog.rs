//! Built-in session catalog.
//!
//! Workout authoring is out of scope; these sessions give the CLI something
//! real to run and cover every protocol plus a pure-cardio session.

use crate::types::*;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Cached default catalog
static DEFAULT_CATALOG: Lazy<Catalog> = Lazy::new(build_default_catalog);

/// Get a reference to the cached default catalog
pub fn get_default_catalog() -> &'static Catalog {
    &DEFAULT_CATALOG
}

fn reps(id: &str, name: &str, loadable: bool, target: u32) -> Exercise {
    Exercise {
        id: format!("{}_v1", id),
        stable_id: id.into(),
        name: name.into(),
        loadable,
        target: ExerciseTarget::Reps(target),
        energy: false,
        volume_km: None,
        instruction: None,
    }
}

fn manifestation(id: &str, name: &str, loadable: bool, cue: &str) -> Exercise {
    Exercise {
        id: format!("{}_v1", id),
        stable_id: id.into(),
        name: name.into(),
        loadable,
        target: ExerciseTarget::Manifestation(cue.into()),
        energy: false,
        volume_km: None,
        instruction: None,
    }
}

fn energy(mut exercise: Exercise) -> Exercise {
    exercise.energy = true;
    exercise
}

fn module(stable_id: &str, name: &str, protocol: Protocol, exercises: Vec<Exercise>) -> Module {
    Module {
        id: format!("{}_v1", stable_id),
        stable_id: stable_id.into(),
        name: name.into(),
        protocol,
        exercises,
        config: ModuleConfig::default(),
    }
}

fn general_warmup() -> WarmupBlock {
    WarmupBlock {
        title: "General warmup".into(),
        instructions: vec![
            "2 min easy row or bike".into(),
            "10 world's greatest stretch".into(),
            "10 banded pull-aparts".into(),
        ],
        duration_seconds: Some(300),
    }
}

/// Build the default catalog
pub fn build_default_catalog() -> Catalog {
    let mut sessions = HashMap::new();

    // ========================================================================
    // Mixed strength: one block per protocol
    // ========================================================================

    let mut build_push = module(
        "build_push",
        "BUILD - Upper push",
        Protocol::TimeCap,
        vec![
            reps("db_bench_press", "Dumbbell Bench Press", true, 10),
            reps("push_up", "Push-up", false, 10),
        ],
    );
    build_push.config.time_cap_seconds = Some(240);

    let base_chipper = module(
        "base_chipper",
        "BASE - Chipper",
        Protocol::ForTime,
        vec![
            reps("thruster", "Barbell Thruster", true, 30),
            reps("pull_up", "Pull-up", false, 15),
        ],
    );

    let mut burn_emom = module(
        "burn_emom",
        "BURN - Swing EMOM",
        Protocol::Emom,
        vec![
            reps("kb_swing", "Kettlebell Swing", true, 12),
            reps("burpee", "Burpee", false, 5),
        ],
    );
    burn_emom.config.emom_minutes = Some(6);

    let mut boost_finisher = module(
        "boost_finisher",
        "BOOST - Finisher",
        Protocol::Libre,
        vec![
            manifestation("deadlift", "Deadlift", true, "work up to a crisp heavy triple"),
            energy(manifestation(
                "assault_bike",
                "Assault Bike",
                false,
                "hard but repeatable sprints",
            )),
        ],
    );
    boost_finisher.config.instruction = Some("Rest as needed between sets".into());

    sessions.insert(
        "strength_mixed".to_string(),
        Session {
            id: "strength_mixed".into(),
            name: "Mixed Strength".into(),
            description: "Push strength, a short chipper, a swing EMOM and a free finisher".into(),
            pure_cardio: false,
            warmup: vec![general_warmup()],
            modules: vec![build_push, base_chipper, burn_emom, boost_finisher],
        },
    );

    // ========================================================================
    // Lower body
    // ========================================================================

    let mut base_squat = module(
        "base_squat_emom",
        "BASE - Squat EMOM",
        Protocol::Emom,
        vec![reps("goblet_squat", "Goblet Squat", true, 8)],
    );
    base_squat.config.emom_minutes = Some(4);

    let mut build_legs = module(
        "build_legs",
        "BUILD - Legs",
        Protocol::TimeCap,
        vec![
            reps("reverse_lunge", "DB Reverse Lunge", true, 10),
            reps("step_up", "Box Step-up", true, 10),
        ],
    );
    build_legs.config.time_cap_seconds = Some(300);

    let burn_legs = module(
        "burn_legs",
        "BURN - Leg burner",
        Protocol::ForTime,
        vec![
            reps("air_squat", "Air Squat", false, 50),
            reps("wall_ball", "Wall Ball", true, 30),
        ],
    );

    sessions.insert(
        "lower_body".to_string(),
        Session {
            id: "lower_body".into(),
            name: "Lower Body".into(),
            description: "Squat EMOM into lunges and a for-time leg burner".into(),
            pure_cardio: false,
            warmup: vec![general_warmup()],
            modules: vec![base_squat, build_legs, burn_legs],
        },
    );

    // ========================================================================
    // Pure cardio
    // ========================================================================

    let mut run = energy(manifestation(
        "easy_run",
        "Easy Run",
        false,
        "conversational pace, nasal breathing",
    ));
    run.volume_km = Some(6.0);

    let mut aerobic = module("base_aerobic_run", "BASE - Aerobic run", Protocol::Libre, vec![run]);
    aerobic.config.instruction = Some("Stay below 150 bpm".into());

    sessions.insert(
        "easy_run".to_string(),
        Session {
            id: "easy_run".into(),
            name: "Easy Run".into(),
            description: "Zone 2 run tracked on your watch".into(),
            pure_cardio: true,
            warmup: vec![],
            modules: vec![aerobic],
        },
    );

    Catalog { sessions }
}

impl Catalog {
    /// Validate catalog integrity
    ///
    /// Returns a list of validation errors (empty if valid)
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (id, session) in &self.sessions {
            if id.is_empty() || session.id.is_empty() {
                errors.push("Session has empty ID".to_string());
            }
            if id != &session.id {
                errors.push(format!(
                    "Session key '{}' doesn't match session.id '{}'",
                    id, session.id
                ));
            }
            if session.name.is_empty() {
                errors.push(format!("Session '{}' has empty name", id));
            }
            if session.modules.is_empty() {
                errors.push(format!("Session '{}' has no modules", id));
            }

            let mut module_ids = HashSet::new();
            for module in &session.modules {
                if !module_ids.insert(module.stable_id.as_str()) {
                    errors.push(format!(
                        "Session '{}' has duplicate module stable id '{}'",
                        id, module.stable_id
                    ));
                }
                if module.exercises.is_empty() {
                    errors.push(format!(
                        "Session '{}': module '{}' has no exercises",
                        id, module.stable_id
                    ));
                }
                if module.config.time_cap_seconds == Some(0) {
                    errors.push(format!(
                        "Session '{}': module '{}' has a zero time cap",
                        id, module.stable_id
                    ));
                }

                let mut exercise_ids = HashSet::new();
                for exercise in &module.exercises {
                    if !exercise_ids.insert(exercise.stable_id.as_str()) {
                        errors.push(format!(
                            "Module '{}' has duplicate exercise stable id '{}'",
                            module.stable_id, exercise.stable_id
                        ));
                    }
                    if module.protocol == Protocol::Emom && exercise.target.reps().is_none() {
                        errors.push(format!(
                            "EMOM module '{}': exercise '{}' has no numeric rep target",
                            module.stable_id, exercise.stable_id
                        ));
                    }
                }
            }
        }

        for protocol in [Protocol::TimeCap, Protocol::ForTime, Protocol::Emom, Protocol::Libre] {
            let covered = self
                .sessions
                .values()
                .flat_map(|s| s.modules.iter())
                .any(|m| m.protocol == protocol);
            if !covered {
                errors.push(format!("Catalog has no {} modules", protocol.code()));
            }
        }

        errors
    }
}
