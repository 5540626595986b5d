//! Encoder configuration derived from device capacity.
//!
//! [`derive_encoder_config`] is a pure function of a [`DeviceProfile`] and a
//! codec capability probe. Tiers are evaluated in order and the first match
//! wins, so a machine with plenty of memory but a 1080p display lands in the
//! 1080p tier rather than the best tier its memory would allow.

use serde::Serialize;

/// Frame rate requested for every tier.
pub const FRAME_RATE: u32 = 30;

/// Container/codec identifiers in preference order.
///
/// Hardware-friendly formats come first and plain `video/webm` last. The order
/// reflects real-world support across Chromium builds; do not reorder.
pub const MIME_PREFERENCES: [&str; 7] = [
	"video/webm;codecs=avc1",
	"video/webm;codecs=vp8,opus",
	"video/webm;codecs=vp9,opus",
	"video/webm;codecs=vp9",
	"video/webm;codecs=vp8",
	"video/webm;codecs=h264",
	"video/webm",
];

/// Identifier used when the host supports none of [`MIME_PREFERENCES`].
pub const FALLBACK_MIME_TYPE: &str = "video/webm;codecs=vp8,opus";

/// Device capacity inputs for configuration derivation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceProfile {
	/// Approximate device memory in coarse units (`navigator.deviceMemory`).
	///
	/// [`None`] when the host does not expose it; it then matches no tier.
	pub memory_tier: Option<f64>,
	/// Display width in physical pixels.
	pub physical_width: f64,
	/// Display height in physical pixels.
	pub physical_height: f64,
}

impl DeviceProfile {
	/// Builds a profile from logical screen size and the device pixel ratio.
	pub fn from_screen(memory_tier: Option<f64>, width: f64, height: f64, pixel_ratio: f64) -> Self {
		Self {
			memory_tier,
			physical_width: width * pixel_ratio,
			physical_height: height * pixel_ratio,
		}
	}
}

/// Output settings for one recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderConfig {
	pub width: u32,
	pub height: u32,
	pub audio_bits_per_second: u32,
	pub video_bits_per_second: u32,
	pub frame_rate: u32,
	pub mime_type: &'static str,
}

struct Tier {
	min_memory: f64,
	min_width: f64,
	min_height: f64,
	width: u32,
	height: u32,
	audio_bits_per_second: u32,
	video_bits_per_second: u32,
}

const TIERS: [Tier; 3] = [
	Tier {
		min_memory: 8.0,
		min_width: 3840.0,
		min_height: 2160.0,
		width: 4096,
		height: 2160,
		audio_bits_per_second: 192_000,
		video_bits_per_second: 40_000_000,
	},
	Tier {
		min_memory: 4.0,
		min_width: 1920.0,
		min_height: 1080.0,
		width: 1920,
		height: 1080,
		audio_bits_per_second: 192_000,
		video_bits_per_second: 8_000_000,
	},
	Tier {
		min_memory: 2.0,
		min_width: 1280.0,
		min_height: 720.0,
		width: 1280,
		height: 720,
		audio_bits_per_second: 128_000,
		video_bits_per_second: 5_000_000,
	},
];

const FALLBACK_TIER: Tier = Tier {
	min_memory: 0.0,
	min_width: 0.0,
	min_height: 0.0,
	width: 854,
	height: 480,
	audio_bits_per_second: 96_000,
	video_bits_per_second: 2_500_000,
};

impl Tier {
	fn matches(&self, profile: &DeviceProfile) -> bool {
		profile.memory_tier.is_some_and(|memory| memory >= self.min_memory)
			&& profile.physical_width >= self.min_width
			&& profile.physical_height >= self.min_height
	}
}

/// Returns the first entry of [`MIME_PREFERENCES`] accepted by `is_supported`,
/// or [`FALLBACK_MIME_TYPE`] when none is.
pub fn select_mime_type(is_supported: impl Fn(&str) -> bool) -> &'static str {
	MIME_PREFERENCES
		.iter()
		.copied()
		.find(|mime| is_supported(mime))
		.unwrap_or(FALLBACK_MIME_TYPE)
}

/// Derives the encoder configuration for a session.
pub fn derive_encoder_config(profile: &DeviceProfile, is_supported: impl Fn(&str) -> bool) -> EncoderConfig {
	let tier = TIERS.iter().find(|tier| tier.matches(profile)).unwrap_or(&FALLBACK_TIER);

	EncoderConfig {
		width: tier.width,
		height: tier.height,
		audio_bits_per_second: tier.audio_bits_per_second,
		video_bits_per_second: tier.video_bits_per_second,
		frame_rate: FRAME_RATE,
		mime_type: select_mime_type(is_supported),
	}
}
