//! Change detection between a fresh scrape and the stored node.
//!
//! Cosmetic differences (case, whitespace, ordering, logos, webpage ids) do
//! not count as changes.

use enricher_shared::{Education, Node, WorkExperience};
use tracing::debug;

use crate::Profile;
use crate::text::comparable;

/// Marker reported when a node has never had a description generated.
pub const INITIAL_GENERATION: &str = "initial_generation";

/// Which compared fields differ.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changed_fields: Vec<String>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.changed_fields.is_empty()
    }
}

/// Compare `profile` against what `existing` already holds.
pub fn detect_changes(profile: &Profile, existing: &Node) -> ChangeSet {
    if !existing.description_generated {
        return ChangeSet {
            changed_fields: vec![INITIAL_GENERATION.into()],
        };
    }

    let mut changed = Vec::new();
    let mut compare = |field: &str, same: bool| {
        if !same {
            debug!(field, "field changed");
            changed.push(field.to_string());
        }
    };

    compare(
        "about",
        comparable(profile.about.as_deref()) == comparable(existing.about.as_deref()),
    );
    compare(
        "bio",
        comparable(profile.bio.as_deref()) == comparable(existing.bio.as_deref()),
    );
    compare(
        "linkedinHeadline",
        comparable(profile.headline.as_deref())
            == comparable(existing.linkedin_headline.as_deref()),
    );
    compare(
        "workExperience",
        experience_key(&profile.work_experience) == experience_key(&existing.work_experience),
    );
    compare(
        "education",
        education_key(&profile.education) == education_key(&existing.education),
    );
    compare(
        "currentLocation",
        comparable(profile.location.as_deref()) == comparable(existing.current_location.as_deref()),
    );

    ChangeSet {
        changed_fields: changed,
    }
}

fn experience_key(items: &[WorkExperience]) -> Vec<[String; 4]> {
    let mut keys: Vec<[String; 4]> = items
        .iter()
        .map(|e| {
            [
                comparable(e.company_name.as_deref()),
                comparable(e.company_url.as_deref()),
                comparable(e.title.as_deref()),
                comparable(e.description.as_deref()),
            ]
        })
        .collect();
    keys.sort();
    keys
}

fn education_key(items: &[Education]) -> Vec<[String; 2]> {
    let mut keys: Vec<[String; 2]> = items
        .iter()
        .map(|e| [comparable(e.school.as_deref()), comparable(e.degree.as_deref())])
        .collect();
    keys.sort();
    keys
}

#[cfg(test)]
mod tests {
    use enricher_shared::WebpageId;

    use super::*;

    fn job(company: &str, title: &str) -> WorkExperience {
        WorkExperience {
            company_name: Some(company.into()),
            title: Some(title.into()),
            ..Default::default()
        }
    }

    fn stored() -> Node {
        Node {
            description_generated: true,
            about: Some("Builds compilers".into()),
            current_location: Some("Arlington".into()),
            work_experience: vec![job("Navy", "Officer"), job("Remington Rand", "Engineer")],
            ..Default::default()
        }
    }

    #[test]
    fn never_described_node_always_changes() {
        let node = Node::default();
        let changes = detect_changes(&Profile::default(), &node);
        assert_eq!(changes.changed_fields, vec![INITIAL_GENERATION]);
    }

    #[test]
    fn cosmetic_differences_are_ignored() {
        let mut reordered = vec![job("remington rand", "Engineer"), job("Navy", "officer ")];
        reordered[0].company_logo = Some("https://cdn.example/logo.png".into());
        reordered[1].webpage_id = Some(WebpageId::from("w1"));

        let profile = Profile {
            about: Some("  builds   COMPILERS ".into()),
            location: Some("Arlington".into()),
            work_experience: reordered,
            ..Default::default()
        };
        let changes = detect_changes(&profile, &stored());
        assert!(!changes.has_changes(), "{:?}", changes.changed_fields);
    }

    #[test]
    fn real_edits_are_reported() {
        let profile = Profile {
            about: Some("Builds compilers".into()),
            location: Some("New York".into()),
            work_experience: vec![job("Navy", "Officer")],
            ..Default::default()
        };
        let changes = detect_changes(&profile, &stored());
        assert_eq!(
            changes.changed_fields,
            vec!["workExperience".to_string(), "currentLocation".to_string()]
        );
    }
}
