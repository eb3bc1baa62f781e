use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod wire;

pub use wire::{ConnectionState, PreviewMessage, HEARTBEAT_FRAME};

/// Discrete tier label derived from the overall score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Tier {
    S,
    A,
    B,
    C,
    D,
}

impl Tier {
    /// Thresholds used by the scoring engine: S>=90, A>=80, B>=70, C>=60.
    pub fn from_overall(score: f64) -> Self {
        if score >= 90.0 {
            Tier::S
        } else if score >= 80.0 {
            Tier::A
        } else if score >= 70.0 {
            Tier::B
        } else if score >= 60.0 {
            Tier::C
        } else {
            Tier::D
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::S => "S",
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
            Tier::D => "D",
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Self::D
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_uppercase().as_str() {
            "S" => Ok(Tier::S),
            "A" => Ok(Tier::A),
            "B" => Ok(Tier::B),
            "C" => Ok(Tier::C),
            "D" => Ok(Tier::D),
            other => Err(format!("Unknown tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelInfo {
    pub model_name: String,
    pub display_name: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub huggingface_url: String,
    #[serde(default)]
    pub model_size: Option<String>,
    #[serde(default)]
    pub tensor_types: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ArticleDraft {
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub seo_keywords: Vec<String>,
    #[serde(default = "default_read_time")]
    pub read_time_minutes: u32,
    #[serde(default = "default_author")]
    pub author: String,
}

fn default_read_time() -> u32 {
    5
}

fn default_author() -> String {
    "TopTierModels AI".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelScores {
    pub overall_score: f64,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub speed_score: f64,
    #[serde(default)]
    pub freedom_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SocialPost {
    pub content: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub character_count: usize,
}

/// The full merged view of one preview session. Wire field names are fixed
/// by the protocol and match the hub's storage columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewState {
    pub preview_id: String,
    pub model_data: ModelInfo,
    pub article_data: ArticleDraft,
    pub linkedin_data: SocialPost,
    pub scores_data: ModelScores,
    #[serde(default = "default_publish_status")]
    pub publish_status: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub last_modified: String,
}

fn default_publish_status() -> String {
    "draft".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelInfoPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub huggingface_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensor_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ArticleDraftPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seo_keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_time_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelScoresPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freedom_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SocialPostPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashtags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_count: Option<usize>,
}

/// Partial update to a preview. A group absent from the patch is untouched;
/// within a present group, absent fields retain their prior values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PreviewPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_data: Option<ModelInfoPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_data: Option<ArticleDraftPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_data: Option<SocialPostPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores_data: Option<ModelScoresPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl PreviewPatch {
    pub fn is_empty(&self) -> bool {
        self.model_data.is_none()
            && self.article_data.is_none()
            && self.linkedin_data.is_none()
            && self.scores_data.is_none()
            && self.publish_status.is_none()
            && self.last_modified.is_none()
    }
}

macro_rules! apply_field {
    ($target:expr, $patch:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $patch.$field.clone() {
                $target.$field = value;
            }
        )+
    };
}

macro_rules! apply_opt_field {
    ($target:expr, $patch:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $patch.$field.clone() {
                $target.$field = Some(value);
            }
        )+
    };
}

impl PreviewState {
    /// Folds a patch into the state in place. Purely field-wise: nothing the
    /// patch does not mention is changed.
    pub fn apply_patch(&mut self, patch: &PreviewPatch) {
        if let Some(model) = &patch.model_data {
            apply_field!(
                self.model_data,
                model,
                model_name,
                display_name,
                huggingface_url,
                tensor_types,
                tags,
            );
            apply_opt_field!(self.model_data, model, organization, license, model_size);
        }
        if let Some(article) = &patch.article_data {
            apply_field!(
                self.article_data,
                article,
                title,
                slug,
                excerpt,
                content,
                seo_keywords,
                read_time_minutes,
                author,
            );
        }
        if let Some(social) = &patch.linkedin_data {
            apply_field!(
                self.linkedin_data,
                social,
                content,
                hashtags,
                character_count,
            );
        }
        if let Some(scores) = &patch.scores_data {
            apply_field!(
                self.scores_data,
                scores,
                overall_score,
                tier,
                quality_score,
                speed_score,
                freedom_score,
            );
        }
        if let Some(status) = &patch.publish_status {
            self.publish_status = status.clone();
        }
        if let Some(modified) = &patch.last_modified {
            self.last_modified = modified.clone();
        }
    }
}

/// Applies one inbound channel message to the current merged state.
///
/// Pure: the result depends only on `(current, message)`. A snapshot replaces
/// the state wholesale; a patch without an established base is discarded; a
/// pong never touches state.
pub fn merge_message(
    current: Option<&PreviewState>,
    message: &PreviewMessage,
) -> Option<PreviewState> {
    match message {
        PreviewMessage::Initial(snapshot) => Some(snapshot.clone()),
        PreviewMessage::Update(patch) => current.map(|state| {
            let mut next = state.clone();
            next.apply_patch(patch);
            next
        }),
        PreviewMessage::Pong => current.cloned(),
    }
}

/// Request body for `POST /api/publish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub preview_id: String,
    #[serde(default)]
    pub trigger_netlify_rebuild: bool,
}

/// Response body from `POST /api/publish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
