//! Built-in uniforms refreshed at the start of every frame.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::error::BindingResult;
use crate::renderer::registry::{ResourceRegistry, UniformSpec};
use crate::renderer::types::{UniformId, UniformValue};

/// Name and WGSL type of each built-in, in registration order.
pub const BUILTIN_UNIFORMS: [(&str, &str); 9] = [
    ("time", "f32"),
    ("delta", "f32"),
    ("epoch", "f32"),
    ("screen", "vec2f"),
    ("mouse", "vec2f"),
    ("mouse_click", "f32"),
    ("mouse_down", "f32"),
    ("mouse_wheel", "f32"),
    ("mouse_delta", "vec2f"),
];

/// Host pointer input. Click, wheel and movement delta accumulate between frames
/// and are reported for exactly one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointerState {
    pub position: [f32; 2],
    pub down: bool,
    click: bool,
    wheel: f32,
    delta: [f32; 2],
}

impl PointerState {
    pub fn move_to(&mut self, x: f32, y: f32) {
        self.delta[0] += x - self.position[0];
        self.delta[1] += y - self.position[1];
        self.position = [x, y];
    }

    pub fn press(&mut self) {
        if !self.down {
            self.click = true;
        }
        self.down = true;
    }

    pub fn release(&mut self) {
        self.down = false;
    }

    pub fn scroll(&mut self, amount: f32) {
        self.wheel += amount;
    }

    fn pulses(&self) -> (bool, f32, [f32; 2]) {
        (self.click, self.wheel, self.delta)
    }

    fn clear_pulses(&mut self) {
        self.click = false;
        self.wheel = 0.0;
        self.delta = [0.0; 2];
    }
}

#[derive(Debug)]
pub(crate) struct BuiltinUniforms {
    ids: Vec<UniformId>,
    started: Instant,
    last_frame: Option<Instant>,
    pub(crate) pointer: PointerState,
}

impl BuiltinUniforms {
    /// Must run before any user uniform is declared so built-ins lead `Params`.
    pub(crate) fn register(registry: &mut ResourceRegistry, screen: (u32, u32)) -> BindingResult<Self> {
        let mut ids = Vec::with_capacity(BUILTIN_UNIFORMS.len());
        for (name, ty) in BUILTIN_UNIFORMS {
            let value = match ty {
                "vec2f" => UniformValue::from([0.0_f32; 2]),
                _ => UniformValue::from(0.0_f32),
            };
            ids.push(registry.declare_uniform(UniformSpec::new(name, value).typed(ty))?);
        }
        let mut builtins = Self {
            ids,
            started: Instant::now(),
            last_frame: None,
            pointer: PointerState::default(),
        };
        builtins.set(registry, "screen", UniformValue::from([screen.0 as f32, screen.1 as f32]));
        Ok(builtins)
    }

    fn set(&self, registry: &mut ResourceRegistry, name: &str, value: UniformValue) {
        if let Some(i) = BUILTIN_UNIFORMS.iter().position(|(n, _)| *n == name) {
            registry.set_uniform_value(self.ids[i], value);
        }
    }

    pub(crate) fn update(&mut self, registry: &mut ResourceRegistry, screen: (u32, u32), now: Instant) {
        let time = now.saturating_duration_since(self.started).as_secs_f32();
        let delta = self
            .last_frame
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last_frame = Some(now);

        // Seconds into the current UTC day; a full Unix timestamp does not survive f32.
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| (d.as_secs_f64() % 86_400.0) as f32)
            .unwrap_or(0.0);

        let (click, wheel, moved) = self.pointer.pulses();
        let pointer = self.pointer;

        self.set(registry, "time", time.into());
        self.set(registry, "delta", delta.into());
        self.set(registry, "epoch", epoch.into());
        self.set(registry, "screen", [screen.0 as f32, screen.1 as f32].into());
        self.set(registry, "mouse", pointer.position.into());
        self.set(registry, "mouse_click", click.into());
        self.set(registry, "mouse_down", pointer.down.into());
        self.set(registry, "mouse_wheel", wheel.into());
        self.set(registry, "mouse_delta", moved.into());
    }

    /// Pulses stay pending until a frame carrying them has been submitted.
    pub(crate) fn frame_submitted(&mut self) {
        self.pointer.clear_pulses();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn value(registry: &ResourceRegistry, name: &str) -> Vec<f64> {
        let id = registry.find_uniform(name).unwrap();
        registry.uniform(id).value.leaves()
    }

    #[test]
    fn builtins_lead_the_uniform_list() {
        let mut reg = ResourceRegistry::new();
        BuiltinUniforms::register(&mut reg, (640, 480)).unwrap();
        let names: Vec<_> = reg.uniforms().iter().map(|u| u.meta.name.as_str()).collect();
        assert_eq!(names, BUILTIN_UNIFORMS.map(|(n, _)| n));
        assert_eq!(value(&reg, "screen"), vec![640.0, 480.0]);
    }

    #[test]
    fn pointer_pulses_last_one_frame() {
        let mut reg = ResourceRegistry::new();
        let mut builtins = BuiltinUniforms::register(&mut reg, (8, 8)).unwrap();
        let t0 = builtins.started;

        builtins.pointer.move_to(3.0, 4.0);
        builtins.pointer.press();
        builtins.pointer.scroll(2.5);
        builtins.update(&mut reg, (8, 8), t0 + Duration::from_millis(500));
        assert_eq!(value(&reg, "mouse"), vec![3.0, 4.0]);
        assert_eq!(value(&reg, "mouse_click"), vec![1.0]);
        assert_eq!(value(&reg, "mouse_down"), vec![1.0]);
        assert_eq!(value(&reg, "mouse_wheel"), vec![2.5]);
        assert_eq!(value(&reg, "mouse_delta"), vec![3.0, 4.0]);
        assert_eq!(value(&reg, "time"), vec![0.5]);
        assert_eq!(value(&reg, "delta"), vec![0.0]);

        builtins.frame_submitted();
        builtins.update(&mut reg, (8, 8), t0 + Duration::from_millis(750));
        assert_eq!(value(&reg, "mouse_click"), vec![0.0]);
        assert_eq!(value(&reg, "mouse_down"), vec![1.0]);
        assert_eq!(value(&reg, "mouse_wheel"), vec![0.0]);
        assert_eq!(value(&reg, "mouse_delta"), vec![0.0, 0.0]);
        assert_eq!(value(&reg, "delta"), vec![0.25]);
    }

    #[test]
    fn pulses_survive_until_submitted() {
        let mut reg = ResourceRegistry::new();
        let mut builtins = BuiltinUniforms::register(&mut reg, (8, 8)).unwrap();
        let t0 = builtins.started;

        builtins.pointer.press();
        builtins.pointer.release();
        builtins.update(&mut reg, (8, 8), t0);
        builtins.update(&mut reg, (8, 8), t0 + Duration::from_millis(16));
        assert_eq!(value(&reg, "mouse_click"), vec![1.0]);
        assert_eq!(value(&reg, "mouse_down"), vec![0.0]);

        builtins.frame_submitted();
        builtins.update(&mut reg, (8, 8), t0 + Duration::from_millis(32));
        assert_eq!(value(&reg, "mouse_click"), vec![0.0]);
    }
}
