//! Observation capture strategies.

use {
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    tracing::debug,
};

use crate::{
    error::{EnvError, Result},
    observation::{Observation, ObservationKind},
    session::{ImageFormat, ProtocolSession},
    spec::EnvSpec,
};

/// How observations are captured. Chosen once per environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStrategy {
    /// Lossless screenshot of the whole frame.
    PngFrame,
    /// Lossless copy of the first canvas, rescaled to `width` x `height`.
    PngCanvas { width: u32, height: u32 },
    /// Lossy screenshot of the whole frame.
    JpegFrame { quality: u8 },
}

impl CaptureStrategy {
    /// Pick the strategy for `spec`. Compression always wins over canvas
    /// capture.
    pub fn select(spec: &EnvSpec, compression: Option<u8>) -> Self {
        match compression {
            Some(quality) => Self::JpegFrame { quality },
            None if spec.all_canvas => Self::PngCanvas {
                width: spec.width,
                height: spec.height,
            },
            None => Self::PngFrame,
        }
    }

    pub fn kind(&self) -> ObservationKind {
        match self {
            Self::PngFrame => ObservationKind::PngFrame,
            Self::PngCanvas { .. } => ObservationKind::PngCanvas,
            Self::JpegFrame { .. } => ObservationKind::JpegFrame,
        }
    }

    pub async fn capture(&self, session: &dyn ProtocolSession) -> Result<Observation> {
        let data = match *self {
            Self::PngFrame => session.screenshot(ImageFormat::Png, None).await?,
            Self::JpegFrame { quality } => {
                session
                    .screenshot(ImageFormat::Jpeg, Some(quality))
                    .await?
            },
            Self::PngCanvas { width, height } => {
                let value = session.evaluate(&canvas_script(width, height)).await?;
                let encoded = value.as_str().ok_or_else(|| {
                    EnvError::Evaluation(format!("canvas capture returned {value}"))
                })?;
                BASE64
                    .decode(encoded)
                    .map_err(|e| EnvError::Decode(format!("canvas data: {e}")))?
            },
        };
        debug!(kind = ?self.kind(), bytes = data.len(), "captured observation");
        Ok(Observation::new(self.kind(), data))
    }
}

/// Script returning the first canvas as base64 PNG of exactly
/// `width` x `height`. Canvases are often scaled for HiDPI displays or for
/// the largest supported window size, so mismatches are redrawn offscreen.
pub(crate) fn canvas_script(width: u32, height: u32) -> String {
    format!(
        r#"Promise.resolve((function() {{
            var canvas = document.getElementsByTagName('canvas')[0];
            if (!canvas) {{
                throw new Error('no canvas element');
            }}
            var desiredWidth = {width};
            var desiredHeight = {height};
            if (canvas.width !== desiredWidth || canvas.height !== desiredHeight) {{
                var dst = document.createElement('canvas');
                dst.width = desiredWidth;
                dst.height = desiredHeight;
                dst.getContext('2d').drawImage(canvas, 0, 0, desiredWidth, desiredHeight);
                canvas = dst;
            }}
            var prefixLen = 'data:image/png;base64,'.length;
            return canvas.toDataURL('image/png').slice(prefixLen);
        }})());"#
    )
}
