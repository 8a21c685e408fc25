use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How new fragments combine with what is already in the back buffer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    /// Alpha-weighted average of source and destination.
    #[default]
    Avg,
    /// Source added onto the destination. Needs a float render target to avoid
    /// clipping.
    Add,
}

impl BlendMode {
    pub fn blend_state(self) -> wgpu::BlendState {
        let color = match self {
            BlendMode::Avg => wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            BlendMode::Add => wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        };
        wgpu::BlendState {
            color,
            alpha: wgpu::BlendComponent::OVER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn blend_factors() {
        let add = BlendMode::Add.blend_state();
        assert_eq!(add.color.dst_factor, wgpu::BlendFactor::One);
        let avg = BlendMode::Avg.blend_state();
        assert_eq!(avg.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
        assert_eq!(BlendMode::from_str("ADD").unwrap(), BlendMode::Add);
    }
}
