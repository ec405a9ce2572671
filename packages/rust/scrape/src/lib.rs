//! Profile extraction from raw HTML.
//!
//! [`scrape`] picks a [`ProfileAdapter`] for the page, pulls structured
//! profile fields out of it, and renders the page body to Markdown (via
//! `htmd`) for prompting. API-scraped records skip HTML entirely and are
//! read with [`Profile::from_node`].

pub mod adapters;
pub mod changes;
pub mod text;

use std::sync::LazyLock;

use enricher_shared::{Education, EnricherError, Node, Result, WorkExperience};
use scraper::{Html, Selector};
use tracing::{debug, instrument};

pub use adapters::{AdapterRegistry, GenericAdapter, JsonLdAdapter, ProfileAdapter};
pub use changes::{ChangeSet, INITIAL_GENERATION, detect_changes};
pub use text::{company_name_similarity, normalize_text};

/// Upper bound on page text handed to the generator.
pub const MAX_PROMPT_CHARS: usize = 24_000;

/// Fields counted by the empty-profile guard.
const GUARDED_FIELDS: usize = 5;

/// Empty guarded fields at or above this count abort the run.
const EMPTY_FIELD_LIMIT: usize = 3;

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Structured fields of one profile page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub name: Option<String>,
    pub headline: Option<String>,
    pub bio: Option<String>,
    pub about: Option<String>,
    pub location: Option<String>,
    /// Canonical profile URL, when the page declares one.
    pub profile_url: Option<String>,
    pub work_experience: Vec<WorkExperience>,
    pub education: Vec<Education>,
    pub skills: Vec<String>,
    /// Markdown rendition of the page, used as generator input.
    pub text: String,
}

impl Profile {
    /// Profile of an API-scraped record: its own fields, no HTML.
    pub fn from_node(node: &Node) -> Self {
        let mut profile = Self {
            name: node.name.clone(),
            headline: node.linkedin_headline.clone(),
            bio: node.bio.clone(),
            about: node.about.clone(),
            location: node.current_location.clone(),
            profile_url: node.profile_url.clone(),
            work_experience: node.work_experience.clone(),
            education: node.education.clone(),
            skills: node.skills.iter().map(|s| s.name.clone()).collect(),
            text: String::new(),
        };
        profile.text = profile.render_markdown();
        profile
    }

    /// Names of guarded fields that are empty.
    pub fn empty_fields(&self) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        let checks: [(&'static str, bool); GUARDED_FIELDS] = [
            ("about", blank(&self.about)),
            ("workExperience", self.work_experience.is_empty()),
            ("education", self.education.is_empty()),
            ("skills", self.skills.is_empty()),
            ("currentLocation", blank(&self.location)),
        ];
        checks
            .into_iter()
            .filter_map(|(name, empty)| empty.then_some(name))
            .collect()
    }

    /// Fail with [`EnricherError::EmptyProfile`] when the profile is too sparse.
    pub fn check_not_empty(&self) -> Result<()> {
        let empty = self.empty_fields();
        if empty.len() >= EMPTY_FIELD_LIMIT {
            return Err(EnricherError::EmptyProfile(format!(
                "{} of {GUARDED_FIELDS} profile fields are empty: {}",
                empty.len(),
                empty.join(", ")
            )));
        }
        Ok(())
    }

    /// Markdown summary of the structured fields.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        if let Some(name) = &self.name {
            out.push_str(&format!("# {name}\n\n"));
        }
        for (label, value) in [
            ("Headline", &self.headline),
            ("Bio", &self.bio),
            ("Location", &self.location),
        ] {
            if let Some(v) = value {
                out.push_str(&format!("{label}: {v}\n"));
            }
        }
        if let Some(about) = &self.about {
            out.push_str(&format!("\n## About\n\n{about}\n"));
        }
        if !self.work_experience.is_empty() {
            out.push_str("\n## Experience\n\n");
            for exp in &self.work_experience {
                let title = exp.title.as_deref().unwrap_or("Role");
                let company = exp.company_name.as_deref().unwrap_or("unknown company");
                out.push_str(&format!("- {title} at {company}"));
                if let Some(desc) = &exp.description {
                    out.push_str(&format!(": {desc}"));
                }
                out.push('\n');
            }
        }
        if !self.education.is_empty() {
            out.push_str("\n## Education\n\n");
            for edu in &self.education {
                let school = edu.school.as_deref().unwrap_or("unknown school");
                match &edu.degree {
                    Some(degree) => out.push_str(&format!("- {school} ({degree})\n")),
                    None => out.push_str(&format!("- {school}\n")),
                }
            }
        }
        if !self.skills.is_empty() {
            out.push_str(&format!("\n## Skills\n\n{}\n", self.skills.join(", ")));
        }
        text::squeeze_blank_lines(&out)
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Extract a profile from raw HTML.
#[instrument(skip_all, fields(html_len = html.len()))]
pub fn scrape(html: &str) -> Result<Profile> {
    if html.trim().is_empty() {
        return Err(EnricherError::ContentUnavailable("HTML is empty".into()));
    }

    let doc = Html::parse_document(html);
    let registry = AdapterRegistry::new();
    let adapter = registry.detect(&doc);
    let mut profile = adapter.extract(&doc);

    let page_text = page_markdown(&doc)?;
    profile.text = if page_text.is_empty() {
        profile.render_markdown()
    } else {
        text::truncate_chars(&page_text, MAX_PROMPT_CHARS).to_string()
    };

    debug!(
        adapter = adapter.name(),
        experiences = profile.work_experience.len(),
        skills = profile.skills.len(),
        text_len = profile.text.len(),
        "profile extracted"
    );
    Ok(profile)
}

/// Main content of the page as Markdown, page chrome removed.
fn page_markdown(doc: &Html) -> Result<String> {
    static CONTENT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
        ["main", "article", r#"[role="main"]"#, "body"]
            .iter()
            .map(|css| Selector::parse(css).expect("valid selector"))
            .collect()
    });

    // Most specific container wins, not the first in document order.
    let Some(content) = CONTENT.iter().find_map(|sel| doc.select(sel).next()) else {
        return Ok(String::new());
    };

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "svg",
            "img", "button", "form",
        ])
        .build();
    let markdown = converter
        .convert(&content.inner_html())
        .map_err(|e| EnricherError::parse(format!("htmd conversion failed: {e}")))?;

    Ok(text::squeeze_blank_lines(&markdown))
}
