//! Concept artifacts, palettes, and image references.

use super::{ConceptId, GenerationDomainError, OwnerId, TaskId, VariationId};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Raw encoded image payload.
///
/// Shared cheaply between the concurrent variation units.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBytes(Arc<[u8]>);

impl ImageBytes {
    /// Returns the encoded bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ImageBytes {
    fn from(value: Vec<u8>) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&[u8]> for ImageBytes {
    fn from(value: &[u8]) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Debug for ImageBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageBytes({} bytes)", self.0.len())
    }
}

/// Accessible reference to a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    path: String,
    access_url: String,
    expires_at: Option<DateTime<Utc>>,
}

impl ImageRef {
    /// Creates an image reference.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        access_url: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            path: path.into(),
            access_url: access_url.into(),
            expires_at,
        }
    }

    /// Returns the object path inside its bucket.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the time-limited access URL.
    #[must_use]
    pub fn access_url(&self) -> &str {
        &self.access_url
    }

    /// Returns when the access URL stops working, if it expires.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

/// Object key whose first segment is the owning principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Builds `<owner>/<segment>/<segment>...`.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationDomainError::InvalidPathSegment`] when a segment is
    /// blank, contains `/`, or is a relative component.
    pub fn owner_scoped<'a>(
        owner_id: OwnerId,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, GenerationDomainError> {
        let mut path = owner_id.to_string();
        for segment in segments {
            let trimmed = segment.trim();
            if trimmed.is_empty() || trimmed.contains('/') || trimmed == "." || trimmed == ".." {
                return Err(GenerationDomainError::InvalidPathSegment(segment.to_owned()));
            }
            path.push('/');
            path.push_str(trimmed);
        }
        Ok(Self(path))
    }

    /// Returns the full object key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated `#RRGGBB` color, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor(String);

impl HexColor {
    /// Parses a hex color, accepting an optional leading `#`.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationDomainError::InvalidHexColor`] for anything other
    /// than six hex digits.
    pub fn parse(value: &str) -> Result<Self, GenerationDomainError> {
        let trimmed = value.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        let is_valid = digits.len() == 6 && digits.chars().all(|ch| ch.is_ascii_hexdigit());
        if !is_valid {
            return Err(GenerationDomainError::InvalidHexColor(value.to_owned()));
        }
        Ok(Self(format!("#{}", digits.to_ascii_uppercase())))
    }

    /// Returns the canonical `#RRGGBB` form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HexColor {
    type Error = GenerationDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HexColor> for String {
    fn from(value: HexColor) -> Self {
        value.0
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One palette proposed by the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteSpec {
    name: String,
    colors: Vec<HexColor>,
    description: String,
}

impl PaletteSpec {
    /// Creates a palette with at least one color.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationDomainError::EmptyPalette`] when `colors` is empty.
    pub fn new(
        name: impl Into<String>,
        colors: Vec<HexColor>,
        description: impl Into<String>,
    ) -> Result<Self, GenerationDomainError> {
        let palette_name = name.into();
        if colors.is_empty() {
            return Err(GenerationDomainError::EmptyPalette(palette_name));
        }
        Ok(Self {
            name: palette_name,
            colors,
            description: description.into(),
        })
    }

    /// Returns the palette name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the ordered palette colors.
    #[must_use]
    pub fn colors(&self) -> &[HexColor] {
        &self.colors
    }

    /// Returns the palette description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns a lower-case, path-safe slug of the palette name.
    #[must_use]
    pub fn slug(&self) -> String {
        let slug: String = self
            .name
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() {
                    ch.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        let collapsed = slug
            .split('-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        if collapsed.is_empty() {
            "palette".to_owned()
        } else {
            collapsed
        }
    }
}

/// Durable artifact of a completed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    id: ConceptId,
    owner_id: OwnerId,
    task_id: TaskId,
    logo_description: String,
    theme_description: String,
    base_image: ImageRef,
    created_at: DateTime<Utc>,
}

/// Parameter object for creating a concept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptParams {
    /// Requesting principal.
    pub owner_id: OwnerId,
    /// Originating task.
    pub task_id: TaskId,
    /// Logo description copied from the task.
    pub logo_description: String,
    /// Theme description copied from the task.
    pub theme_description: String,
    /// Stored base image.
    pub base_image: ImageRef,
}

impl Concept {
    /// Creates a new concept with a fresh identifier.
    #[must_use]
    pub fn new(params: ConceptParams, clock: &impl Clock) -> Self {
        Self::with_id(ConceptId::new(), params, clock.utc())
    }

    /// Creates a concept with a caller-chosen identifier.
    ///
    /// Used when the identifier is needed before the concept exists, such as
    /// scoping variation object paths.
    #[must_use]
    pub fn with_id(id: ConceptId, params: ConceptParams, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id: params.owner_id,
            task_id: params.task_id,
            logo_description: params.logo_description,
            theme_description: params.theme_description,
            base_image: params.base_image,
            created_at,
        }
    }

    /// Returns the concept identifier.
    #[must_use]
    pub const fn id(&self) -> ConceptId {
        self.id
    }

    /// Returns the owning principal.
    #[must_use]
    pub const fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    /// Returns the originating task.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns the logo description.
    #[must_use]
    pub fn logo_description(&self) -> &str {
        &self.logo_description
    }

    /// Returns the theme description.
    #[must_use]
    pub fn theme_description(&self) -> &str {
        &self.theme_description
    }

    /// Returns the stored base image.
    #[must_use]
    pub const fn base_image(&self) -> &ImageRef {
        &self.base_image
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// One derived rendering of a concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variation {
    id: VariationId,
    concept_id: ConceptId,
    palette: PaletteSpec,
    image: ImageRef,
    created_at: DateTime<Utc>,
}

impl Variation {
    /// Creates a variation linked to `concept_id`.
    #[must_use]
    pub fn new(
        concept_id: ConceptId,
        palette: PaletteSpec,
        image: ImageRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: VariationId::new(),
            concept_id,
            palette,
            image,
            created_at,
        }
    }

    /// Reconstructs a variation from persisted storage.
    #[must_use]
    pub const fn from_persisted(
        id: VariationId,
        concept_id: ConceptId,
        palette: PaletteSpec,
        image: ImageRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            concept_id,
            palette,
            image,
            created_at,
        }
    }

    /// Returns the variation identifier.
    #[must_use]
    pub const fn id(&self) -> VariationId {
        self.id
    }

    /// Returns the parent concept.
    #[must_use]
    pub const fn concept_id(&self) -> ConceptId {
        self.concept_id
    }

    /// Returns the palette used for this rendering.
    #[must_use]
    pub const fn palette(&self) -> &PaletteSpec {
        &self.palette
    }

    /// Returns the stored rendering.
    #[must_use]
    pub const fn image(&self) -> &ImageRef {
        &self.image
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A concept together with its full variation set, persisted as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptBatch {
    concept: Concept,
    variations: Vec<Variation>,
}

impl ConceptBatch {
    /// Bundles a concept with variations that all point at it.
    ///
    /// Variations linked to another concept are dropped.
    #[must_use]
    pub fn new(concept: Concept, variations: Vec<Variation>) -> Self {
        let concept_id = concept.id();
        let linked = variations
            .into_iter()
            .filter(|variation| variation.concept_id() == concept_id)
            .collect();
        Self {
            concept,
            variations: linked,
        }
    }

    /// Returns the concept.
    #[must_use]
    pub const fn concept(&self) -> &Concept {
        &self.concept
    }

    /// Returns the variations.
    #[must_use]
    pub fn variations(&self) -> &[Variation] {
        &self.variations
    }
}
