use serde::Deserialize;

use crate::pipeline::backends::BackendMode;
use crate::pipeline::error::TransformError;
use crate::pipeline::orchestrator::TransformStrategy;
use crate::pipeline::photo::Photo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HairVolume {
    Flat,
    Natural,
    Voluminous,
}

impl HairVolume {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "flat" | "sleek" => Some(Self::Flat),
            "natural" | "medium" => Some(Self::Natural),
            "voluminous" | "full" | "big" => Some(Self::Voluminous),
            _ => None,
        }
    }

    fn phrase(self) -> &'static str {
        match self {
            Self::Flat => "sleek and close to the head",
            Self::Natural => "with natural, moderate volume",
            Self::Voluminous => "with full, voluminous body",
        }
    }
}

/// How the caller wants the hair rendered.
#[derive(Debug, Clone, Default)]
pub struct StyleDescriptor {
    pub description: String,
    pub color: Option<String>,
    pub volume: Option<HairVolume>,
    pub reference: Option<Photo>,
    pub strategy: Option<TransformStrategy>,
}

impl StyleDescriptor {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_reference(mut self, reference: Photo) -> Self {
        self.reference = Some(reference);
        self
    }
}

const IDENTITY_CLAUSE: &str = "Keep the person's face, facial features, skin, expression, body, \
clothing, lighting and background exactly as they are. Do not alter anything except the hair.";

pub fn build_instructions(style: &StyleDescriptor, mode: BackendMode) -> Result<String, TransformError> {
    let description = style.description.trim();
    if description.is_empty() && style.reference.is_none() {
        return Err(TransformError::invalid_input(
            "hairstyle description is required when no reference photo is given",
        ));
    }

    let mut look = if description.is_empty() {
        String::from("the hairstyle shown in the reference image")
    } else {
        description.to_string()
    };
    if let Some(color) = style
        .color
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        look.push_str(&format!(", colored {color}"));
    }
    if let Some(volume) = style.volume {
        look.push_str(&format!(", {}", volume.phrase()));
    }

    let lead = match mode {
        BackendMode::DirectEdit => format!("Change only this person's hair to: {look}."),
        BackendMode::MaskInpaint => format!(
            "Repaint only the masked hair region so the hair becomes: {look}. Blend naturally into the unmasked areas."
        ),
        BackendMode::ReferenceGuided => format!(
            "The first image is the person to edit; the second image is a hairstyle reference. \
Give the person in the first image {look}, copying cut, texture and color from the reference while keeping the first person's identity."
        ),
    };
    Ok(format!("{lead} {IDENTITY_CLAUSE}"))
}

#[cfg(test)]
mod tests {
    use image::RgbaImage;

    use super::*;
    use crate::pipeline::error::ErrorKind;

    #[test]
    fn includes_color_volume_and_identity_clause() {
        let style = StyleDescriptor {
            description: String::from("a chin-length bob"),
            color: Some(String::from("copper red")),
            volume: Some(HairVolume::Voluminous),
            ..StyleDescriptor::default()
        };

        let text = build_instructions(&style, BackendMode::MaskInpaint).expect("instructions");

        assert!(text.contains("masked hair region"));
        assert!(text.contains("a chin-length bob, colored copper red, with full, voluminous body"));
        assert!(text.ends_with(IDENTITY_CLAUSE));
    }

    #[test]
    fn empty_description_needs_reference() {
        let err = build_instructions(&StyleDescriptor::described("  "), BackendMode::DirectEdit)
            .expect_err("blank description should fail");
        assert_eq!(err.kind, ErrorKind::InvalidInput);

        let reference = Photo::from_rgba(RgbaImage::new(2, 2)).expect("photo should build");
        let text = build_instructions(
            &StyleDescriptor::described("").with_reference(reference),
            BackendMode::ReferenceGuided,
        )
        .expect("reference alone is enough");
        assert!(text.contains("the hairstyle shown in the reference image"));
    }

    #[test]
    fn parses_volume_aliases() {
        assert_eq!(HairVolume::parse("Full"), Some(HairVolume::Voluminous));
        assert_eq!(HairVolume::parse("sleek"), Some(HairVolume::Flat));
        assert_eq!(HairVolume::parse("huge"), None);
    }
}
