//! Structured-data adapter for pages that embed a schema.org `Person`.

use std::sync::LazyLock;

use enricher_shared::{Education, WorkExperience};
use scraper::{Html, Selector};
use serde_json::Value;

use super::{ProfileAdapter, canonical_url};
use crate::Profile;
use crate::text::collapse_whitespace;

static LD_JSON: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid selector")
});

/// Reads `<script type="application/ld+json">` blocks.
pub struct JsonLdAdapter;

impl ProfileAdapter for JsonLdAdapter {
    fn detect(&self, doc: &Html) -> bool {
        find_person(doc).is_some()
    }

    fn extract(&self, doc: &Html) -> Profile {
        let Some(person) = find_person(doc) else {
            return Profile::default();
        };

        let headline = match person.get("jobTitle") {
            Some(Value::Array(titles)) => titles.iter().find_map(str_value),
            Some(other) => str_value(other),
            None => None,
        };

        let location = person.get("address").and_then(|addr| match addr {
            Value::Object(_) => {
                let parts: Vec<String> = ["addressLocality", "addressRegion", "addressCountry"]
                    .iter()
                    .filter_map(|k| addr.get(*k).and_then(str_value))
                    .collect();
                (!parts.is_empty()).then(|| parts.join(", "))
            }
            other => str_value(other),
        });

        let profile_url = person
            .get("url")
            .and_then(str_value)
            .or_else(|| canonical_url(doc));

        let mut work_experience: Vec<WorkExperience> = as_list(person.get("worksFor"))
            .into_iter()
            .filter_map(|org| organization_experience(org, headline.as_deref()))
            .collect();
        let mut education = Vec::new();
        for org in as_list(person.get("alumniOf")) {
            if is_type(org, "EducationalOrganization") {
                education.push(Education {
                    school: org.get("name").and_then(str_value),
                    ..Default::default()
                });
            } else if let Some(exp) = organization_experience(org, None) {
                work_experience.push(exp);
            }
        }

        let skills = as_list(person.get("knowsAbout"))
            .into_iter()
            .filter_map(|s| str_value(s).or_else(|| s.get("name").and_then(str_value)))
            .collect();

        Profile {
            name: person.get("name").and_then(str_value),
            headline,
            bio: None,
            about: person.get("description").and_then(str_value),
            location,
            profile_url,
            work_experience,
            education,
            skills,
            text: String::new(),
        }
    }

    fn name(&self) -> &str {
        "json-ld"
    }
}

/// First `Person` object across all JSON-LD blocks (top level, arrays, `@graph`).
fn find_person(doc: &Html) -> Option<Value> {
    doc.select(&LD_JSON)
        .filter_map(|el| serde_json::from_str::<Value>(&el.text().collect::<String>()).ok())
        .find_map(|v| person_in(&v).cloned())
}

fn person_in(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(person_in),
        Value::Object(map) => {
            if is_type(value, "Person") {
                return Some(value);
            }
            map.get("@graph").and_then(person_in)
        }
        _ => None,
    }
}

fn is_type(value: &Value, wanted: &str) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => t == wanted,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(wanted)),
        _ => false,
    }
}

fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn str_value(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
}

fn organization_experience(org: &Value, title: Option<&str>) -> Option<WorkExperience> {
    let company_name = org.get("name").and_then(str_value)?;
    let member = org.get("member");
    Some(WorkExperience {
        company_name: Some(company_name),
        company_url: org
            .get("url")
            .or_else(|| org.get("sameAs"))
            .and_then(str_value),
        company_logo: org
            .get("logo")
            .and_then(|l| str_value(l).or_else(|| l.get("url").and_then(str_value))),
        title: member
            .and_then(|m| m.get("roleName"))
            .and_then(str_value)
            .or_else(|| title.map(String::from)),
        description: member
            .and_then(|m| m.get("description"))
            .and_then(str_value),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <link rel="canonical" href="https://www.example.com/in/ada-lovelace">
        <script type="application/ld+json">
        {"@context": "https://schema.org", "@graph": [
          {"@type": "WebPage", "name": "profile"},
          {"@type": "Person",
           "name": "Ada Lovelace",
           "jobTitle": ["Analyst", "Writer"],
           "description": "Wrote the first   program.",
           "address": {"addressLocality": "London", "addressCountry": "UK"},
           "worksFor": [{"@type": "Organization", "name": "Analytical Engines Ltd",
                         "url": "https://ae.example/about"}],
           "alumniOf": [
             {"@type": "EducationalOrganization", "name": "Home Tutoring"},
             {"@type": "Organization", "name": "Royal Society",
              "member": {"roleName": "Fellow", "description": "Notes on the engine"}}
           ],
           "knowsAbout": ["Mathematics", {"name": "Poetical Science"}]}
        ]}
        </script></head><body></body></html>"#;

    #[test]
    fn extracts_person_from_graph() {
        let doc = Html::parse_document(PAGE);
        assert!(JsonLdAdapter.detect(&doc));
        let profile = JsonLdAdapter.extract(&doc);

        assert_eq!(profile.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(profile.headline.as_deref(), Some("Analyst"));
        assert_eq!(profile.about.as_deref(), Some("Wrote the first program."));
        assert_eq!(profile.location.as_deref(), Some("London, UK"));
        assert_eq!(
            profile.profile_url.as_deref(),
            Some("https://www.example.com/in/ada-lovelace")
        );
        assert_eq!(profile.work_experience.len(), 2);
        assert_eq!(
            profile.work_experience[0].company_url.as_deref(),
            Some("https://ae.example/about")
        );
        assert_eq!(profile.work_experience[1].title.as_deref(), Some("Fellow"));
        assert_eq!(profile.education[0].school.as_deref(), Some("Home Tutoring"));
        assert_eq!(profile.skills, vec!["Mathematics", "Poetical Science"]);
    }

    #[test]
    fn non_person_markup_is_ignored() {
        let doc = Html::parse_document(
            r#"<script type="application/ld+json">{"@type": "Organization"}</script>"#,
        );
        assert!(!JsonLdAdapter.detect(&doc));
    }
}
