use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Notes & Bookmarks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub folder_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            title: title.into(),
            content: content.into(),
            folder_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_folder(mut self, folder_id: Uuid) -> Self {
        self.folder_id = Some(folder_id);
        self
    }

    /// Text used to derive the note's stored embedding.
    pub fn embedding_text(&self) -> String {
        embedding_text(Some(&self.title), &self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub folder_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bookmark {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            title: title.into(),
            url: url.into(),
            description: None,
            folder_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_folder(mut self, folder_id: Uuid) -> Self {
        self.folder_id = Some(folder_id);
        self
    }

    pub fn embedding_text(&self) -> String {
        let body = match self.description.as_deref() {
            Some(description) if !description.trim().is_empty() => {
                format!("{}\n{}", self.url, description)
            }
            _ => self.url.clone(),
        };
        embedding_text(Some(&self.title), &body)
    }
}

/// Joins an optional title and a body the way entity embeddings are derived.
pub fn embedding_text(title: Option<&str>, body: &str) -> String {
    match title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => format!("{title}\n\n{body}"),
        None => body.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Note,
    Bookmark,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Bookmark => "bookmark",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "note" | "notes" => Ok(Self::Note),
            "bookmark" | "bookmarks" => Ok(Self::Bookmark),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Closed set of concept themes. Provider output outside this set is coerced
/// through [`Theme::coerce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Technology,
    Business,
    Science,
    Philosophy,
    Personal,
    Health,
}

impl Theme {
    pub const ALL: [Theme; 6] = [
        Theme::Technology,
        Theme::Business,
        Theme::Science,
        Theme::Philosophy,
        Theme::Personal,
        Theme::Health,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technology => "technology",
            Self::Business => "business",
            Self::Science => "science",
            Self::Philosophy => "philosophy",
            Self::Personal => "personal",
            Self::Health => "health",
        }
    }

    /// Map a free-form theme label onto the closed set.
    ///
    /// Exact names and common synonyms are recognized; anything else yields
    /// `None` so the caller decides the default.
    pub fn coerce(raw: &str) -> Option<Self> {
        let value = raw.trim().to_ascii_lowercase();
        let theme = match value.as_str() {
            "technology" | "tech" | "technical" | "software" | "engineering" | "computing"
            | "programming" | "ai" => Self::Technology,
            "business" | "finance" | "economics" | "marketing" | "management" | "career"
            | "work" => Self::Business,
            "science" | "research" | "physics" | "biology" | "chemistry" | "math"
            | "mathematics" | "nature" => Self::Science,
            "philosophy" | "ethics" | "religion" | "ideas" | "psychology" | "culture" => {
                Self::Philosophy
            }
            "personal" | "life" | "lifestyle" | "family" | "hobby" | "hobbies" | "travel"
            | "general" | "other" => Self::Personal,
            "health" | "wellness" | "fitness" | "medical" | "medicine" | "nutrition"
            | "sleep" => Self::Health,
            _ => return None,
        };
        Some(theme)
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const MIN_IMPORTANCE: u8 = 1;
pub const MAX_IMPORTANCE: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    pub label: String,
    pub theme: Theme,
    pub importance: u8,
}

impl Concept {
    pub fn new(id: impl Into<String>, label: impl Into<String>, theme: Theme, importance: i64) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            theme,
            importance: clamp_importance(importance),
        }
    }
}

pub fn clamp_importance(value: i64) -> u8 {
    value.clamp(MIN_IMPORTANCE as i64, MAX_IMPORTANCE as i64) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptRelationship {
    pub source_id: String,
    pub target_id: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptGraph {
    pub concepts: Vec<Concept>,
    pub relationships: Vec<ConceptRelationship>,
}

impl ConceptGraph {
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// True when every relationship endpoint names a concept in the graph.
    pub fn is_referentially_intact(&self) -> bool {
        let ids: std::collections::HashSet<&str> =
            self.concepts.iter().map(|c| c.id.as_str()).collect();
        self.relationships
            .iter()
            .all(|r| ids.contains(r.source_id.as_str()) && ids.contains(r.target_id.as_str()))
    }

    /// Enforce graph invariants in place: duplicate concept ids are dropped,
    /// importance is clamped, and relationships with unknown endpoints or
    /// self-loops are removed.
    pub fn sanitize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.concepts.retain(|c| seen.insert(c.id.clone()));
        for concept in &mut self.concepts {
            concept.importance = clamp_importance(concept.importance as i64);
        }
        self.relationships.retain(|r| {
            r.source_id != r.target_id && seen.contains(&r.source_id) && seen.contains(&r.target_id)
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub concept_graph: ConceptGraph,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    #[default]
    All,
    Notes,
    Bookmarks,
}

impl SearchScope {
    pub fn includes(&self, kind: EntityKind) -> bool {
        match self {
            Self::All => true,
            Self::Notes => kind == EntityKind::Note,
            Self::Bookmarks => kind == EntityKind::Bookmark,
        }
    }
}

impl std::str::FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "notes" | "note" => Ok(Self::Notes),
            "bookmarks" | "bookmark" => Ok(Self::Bookmarks),
            other => Err(format!("invalid search type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Text,
    Semantic,
    Fallback,
}

/// How a search hit was matched, highest confidence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    ExactTitle,
    PartialTitle,
    Body,
    Semantic,
}

impl MatchTier {
    /// Fixed confidence score reported for text tiers.
    pub fn confidence(&self) -> f64 {
        match self {
            Self::ExactTitle => 1.0,
            Self::PartialTitle => 0.8,
            Self::Body => 0.6,
            Self::Semantic => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit<T> {
    #[serde(flatten)]
    pub item: T,
    pub score: f64,
    pub matched_by: MatchTier,
}
