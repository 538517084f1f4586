//! The extractor-agnostic block model all four extractors emit into.

use drivescout_core::model::Location;

#[derive(Debug, Clone)]
pub struct TextBlock {
    pub text: String,
    pub location: Location,
    pub heading_context: Option<String>,
}

impl TextBlock {
    pub fn is_heading(&self) -> bool {
        matches!(
            &self.location,
            Location::Doc {
                element_type: drivescout_core::model::ElementType::Heading,
                ..
            }
        ) || matches!(&self.location, Location::Pdf { element_type: Some(drivescout_core::model::ElementType::Heading), .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub title: Option<String>,
    pub blocks: Vec<TextBlock>,
}
