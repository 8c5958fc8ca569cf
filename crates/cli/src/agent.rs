//! A random agent that presses whitelisted keys or clicks at random.

use std::collections::BTreeSet;

use {
    pixelgym_env::{EnvSpec, InputEvent, KeyEvent, PointerEvent},
    rand::Rng,
};

/// Chance per step that a given key flips between held and released.
const TOGGLE_PROBABILITY: f64 = 0.2;

pub struct RandomAgent {
    keys: Vec<String>,
    held: BTreeSet<String>,
    width: u32,
    height: u32,
}

impl RandomAgent {
    pub fn new(spec: &EnvSpec) -> Self {
        Self {
            keys: spec.key_whitelist.clone(),
            held: BTreeSet::new(),
            width: spec.width,
            height: spec.height,
        }
    }

    /// Events for the next step. Games without keys get a random click.
    pub fn act(&mut self, rng: &mut impl Rng) -> Vec<InputEvent> {
        if self.keys.is_empty() {
            let x = f64::from(rng.random_range(0..self.width.max(1)));
            let y = f64::from(rng.random_range(0..self.height.max(1)));
            return vec![
                PointerEvent::pressed(x, y).into(),
                PointerEvent::released(x, y).into(),
            ];
        }

        let mut events = Vec::new();
        for key in &self.keys {
            if !rng.random_bool(TOGGLE_PROBABILITY) {
                continue;
            }
            if self.held.remove(key) {
                events.push(KeyEvent::up(key.clone()).into());
            } else {
                self.held.insert(key.clone());
                events.push(KeyEvent::down(key.clone()).into());
            }
        }
        events
    }

    /// Key-up events for everything still held. Called between episodes.
    pub fn release_all(&mut self) -> Vec<InputEvent> {
        std::mem::take(&mut self.held)
            .into_iter()
            .map(|key| KeyEvent::up(key).into())
            .collect()
    }
}
