//! Effect descriptors
//!
//! The effect registry is owned by the host application. Effects cover
//! video as well as audio processing; the engine only builds stages for the
//! types that report [`EffectType::is_audio`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::EffectId;

/// Effect type tag
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    // Color
    Brightness,
    Contrast,
    Saturation,
    Hue,
    ColorBalance,
    Gamma,
    Levels,
    Curves,
    Lut,

    // Transform
    Crop,
    Flip,
    Mirror,
    Rotate,

    // Blur/Sharpen
    GaussianBlur,
    BoxBlur,
    MotionBlur,
    RadialBlur,
    Sharpen,
    UnsharpMask,

    // Stylize
    Vignette,
    Glow,
    FilmGrain,
    ChromaticAberration,
    Noise,
    Pixelate,
    Posterize,

    // Transitions
    CrossDissolve,
    Fade,
    Wipe,
    Slide,
    Zoom,

    // Audio
    Volume,
    Gain,
    EqBand,
    Compressor,
    Limiter,
    NoiseReduction,
    Reverb,
    Delay,

    // Text
    TextOverlay,
    Subtitle,

    // AI
    BackgroundRemoval,
    AutoReframe,
    FaceBlur,
    ObjectTracking,

    Custom(String),
}

impl EffectType {
    /// Whether this type maps to a real-time audio processing stage.
    ///
    /// Noise reduction is an offline-render-only filter and has no
    /// real-time counterpart.
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            Self::Volume
                | Self::Gain
                | Self::EqBand
                | Self::Compressor
                | Self::Limiter
                | Self::Reverb
                | Self::Delay
        )
    }
}

/// Effect parameter value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Color([f32; 4]),
    Point([f64; 2]),
}

impl ParamValue {
    /// Numeric view of the value (Float and Int only)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// An effect instance as resolved from the registry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectDescriptor {
    pub id: EffectId,
    pub effect_type: EffectType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower runs first; ties keep the clip's list order
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub params: HashMap<String, ParamValue>,
}

fn default_enabled() -> bool {
    true
}

impl EffectDescriptor {
    pub fn new(id: &str, effect_type: EffectType) -> Self {
        Self {
            id: id.to_string(),
            effect_type,
            enabled: true,
            order: 0,
            params: HashMap::new(),
        }
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    pub fn with_param(mut self, name: &str, value: ParamValue) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Parameters restricted to numeric values
    pub fn numeric_params(&self) -> HashMap<String, f64> {
        self.params
            .iter()
            .filter_map(|(k, v)| v.as_float().map(|f| (k.clone(), f)))
            .collect()
    }
}

/// Effect registry lookup
pub trait EffectLookup: Send + Sync {
    fn effect(&self, id: &str) -> Option<EffectDescriptor>;
}

impl EffectLookup for HashMap<EffectId, EffectDescriptor> {
    fn effect(&self, id: &str) -> Option<EffectDescriptor> {
        self.get(id).cloned()
    }
}

impl<T: EffectLookup + ?Sized> EffectLookup for Arc<T> {
    fn effect(&self, id: &str) -> Option<EffectDescriptor> {
        (**self).effect(id)
    }
}
