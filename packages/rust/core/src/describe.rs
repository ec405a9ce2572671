//! Narrative description generation with company context.

use std::collections::HashMap;

use enricher_client::{BackendApi, GenerationClient};
use enricher_scrape::{Profile, company_name_similarity};
use enricher_shared::{
    EnricherError, GeneratedDescription, Node, Result, Webpage, WebpageId, WebpageUrl,
    WorkExperience,
};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

/// Minimum name similarity for accepting a webpage found by search.
pub const COMPANY_MATCH_THRESHOLD: f64 = 0.9;

/// Webpage fields worth showing the generator.
const CONTEXT_FIELDS: &[&str] = &[
    "headline",
    "about",
    "industry",
    "website",
    "location",
    "headquarters",
    "specialties",
];

const SYSTEM_PROMPT: &str = "\
You write concise professional descriptions of people from their profile.

Answer with a single JSON object:
{
  \"description\": \"two or three paragraphs in the third person\",
  \"skills\": [{\"name\": \"2-4 word expertise keyword\", \"description\": \"one sentence of evidence\"}],
  \"organizations\": [{\"name\": \"organization name\", \"synonyms\": [\"other names\"]}]
}

Return 10 to 12 skills. Only state what the profile supports. Use the \
company context to explain what each employer does when it helps.";

/// Output of one generation pass.
#[derive(Debug, Clone)]
pub struct Described {
    pub generated: GeneratedDescription,
    /// Work history with webpage ids attached where resolved.
    pub work_experience: Vec<WorkExperience>,
    /// Unique webpage ids referenced by `work_experience`.
    pub webpage_ids: Vec<WebpageId>,
}

/// Produces a node's description via the generation provider.
pub struct DescriptionGenerator<'a> {
    api: &'a BackendApi,
    generator: &'a GenerationClient,
}

impl<'a> DescriptionGenerator<'a> {
    pub fn new(api: &'a BackendApi, generator: &'a GenerationClient) -> Self {
        Self { api, generator }
    }

    /// Resolve company context for `profile`, then ask the provider for a
    /// description. Provider failures are [`EnricherError::Generation`].
    #[instrument(skip_all, fields(node_id = %node.id))]
    pub async fn generate(&self, node: &Node, profile: &Profile) -> Result<Described> {
        let mut work_experience = if profile.work_experience.is_empty() {
            node.work_experience.clone()
        } else {
            profile.work_experience.clone()
        };

        let mut context = Vec::new();
        let mut webpage_ids: Vec<WebpageId> = Vec::new();
        let mut seen: HashMap<String, Option<Webpage>> = HashMap::new();

        for experience in &mut work_experience {
            let lookup_key = match (&experience.company_url, &experience.company_name) {
                (Some(url), _) => WebpageUrl::parse(url)
                    .map(|u| u.as_str().to_string())
                    .unwrap_or_else(|_| url.clone()),
                (None, Some(name)) => name.trim().to_lowercase(),
                (None, None) => continue,
            };
            if lookup_key.is_empty() {
                continue;
            }
            let page = match seen.get(&lookup_key) {
                Some(cached) => cached.clone(),
                None => {
                    let resolved = self.company_page(experience).await;
                    seen.insert(lookup_key, resolved.clone());
                    resolved
                }
            };

            if let Some(page) = page {
                if !webpage_ids.contains(&page.id) {
                    context.push(context_entry(&page));
                    webpage_ids.push(page.id.clone());
                }
                experience.webpage_id = Some(page.id);
            }
        }

        let prompt = user_prompt(profile, &context);
        let raw = self.generator.complete_json(SYSTEM_PROMPT, &prompt).await?;
        let generated = parse_generated(&raw)?;

        info!(
            skills = generated.skills.len(),
            organizations = generated.organizations.len(),
            webpages = webpage_ids.len(),
            "description generated"
        );
        Ok(Described {
            generated,
            work_experience,
            webpage_ids,
        })
    }

    /// Webpage for one employer, or `None` when it cannot be resolved.
    async fn company_page(&self, experience: &WorkExperience) -> Option<Webpage> {
        let name = experience
            .company_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());

        if let Some(raw_url) = experience.company_url.as_deref() {
            let url = match WebpageUrl::parse(raw_url) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = raw_url, error = %e, "skipping unparsable company URL");
                    return None;
                }
            };
            return match self.api.webpage_by_url(&url).await {
                Ok(Some(page)) => Some(page),
                Ok(None) => match self.api.get_or_create_webpage(&url, name).await {
                    Ok(page) => {
                        debug!(url = %url, webpage_id = %page.id, "webpage created");
                        Some(page)
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "webpage get-or-create failed");
                        None
                    }
                },
                Err(e) => {
                    warn!(url = %url, error = %e, "webpage lookup failed");
                    None
                }
            };
        }

        let name = name?;
        let candidates = match self.api.search_webpages(name).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(company = name, error = %e, "company search failed");
                return None;
            }
        };
        best_name_match(name, candidates)
    }
}

/// Candidate whose name best matches `company`, if above the threshold.
fn best_name_match(company: &str, candidates: Vec<Webpage>) -> Option<Webpage> {
    candidates
        .into_iter()
        .filter_map(|page| {
            let score = company_name_similarity(company, page.name.as_deref()?);
            (score >= COMPANY_MATCH_THRESHOLD).then_some((score, page))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, page)| page)
}

fn context_entry(page: &Webpage) -> Value {
    let mut entry = Map::new();
    entry.insert("url".into(), Value::String(page.url.clone()));
    if let Some(name) = &page.name {
        entry.insert("name".into(), Value::String(name.clone()));
    }
    if let Some(description) = &page.description {
        entry.insert("description".into(), Value::String(description.clone()));
    }
    for &field in CONTEXT_FIELDS {
        if let Some(value) = page.extra.get(field).filter(|v| !v.is_null()) {
            entry.insert(field.into(), value.clone());
        }
    }
    Value::Object(entry)
}

fn user_prompt(profile: &Profile, context: &[Value]) -> String {
    let text = if profile.text.trim().is_empty() {
        profile.render_markdown()
    } else {
        profile.text.clone()
    };
    let context = serde_json::to_string_pretty(&json!({"companies": context}))
        .unwrap_or_else(|_| "{}".into());
    format!("<profile>\n{text}\n</profile>\n\n<company_context>\n{context}\n</company_context>")
}

/// Parse provider output, tolerating a Markdown code fence around the JSON.
fn parse_generated(raw: &str) -> Result<GeneratedDescription> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    let mut generated: GeneratedDescription = serde_json::from_str(body.trim())
        .map_err(|e| EnricherError::Generation(format!("unparsable provider output: {e}")))?;

    generated.description = generated.description.trim().to_string();
    if generated.description.is_empty() {
        return Err(EnricherError::Generation("provider returned an empty description".into()));
    }
    generated.skills.retain(|s| !s.name.trim().is_empty());
    generated.organizations.retain(|o| !o.name.trim().is_empty());
    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{FakeBackend, chat_reply, services};

    fn profile_with(experience: Vec<WorkExperience>) -> Profile {
        Profile {
            name: Some("Jane Doe".into()),
            about: Some("Builds data platforms.".into()),
            work_experience: experience,
            text: "# Jane Doe\n\nBuilds data platforms.".into(),
            ..Default::default()
        }
    }

    fn job(company: &str, url: Option<&str>) -> WorkExperience {
        WorkExperience {
            company_name: Some(company.into()),
            company_url: url.map(String::from),
            title: Some("Engineer".into()),
            ..Default::default()
        }
    }

    fn answer() -> Value {
        json!({
            "description": "Jane builds data platforms.",
            "skills": [{"name": "Data Platforms", "description": "Led platform work."}, {"name": " "}],
            "organizations": [{"name": "Acme", "synonyms": ["Acme Inc"]}]
        })
    }

    async fn mount_llm(server: &wiremock::MockServer, reply: wiremock::ResponseTemplate) {
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/llm/chat/completions"))
            .respond_with(reply)
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn company_url_is_created_once_and_attached() {
        let server = wiremock::MockServer::start().await;
        let backend = FakeBackend::default();
        backend.mount(&server).await;
        mount_llm(&server, chat_reply(answer())).await;

        let services = services(&server).await;
        let generator = DescriptionGenerator::new(&services.api, &services.generator);
        let profile = profile_with(vec![
            job("Acme", Some("https://acme.com/?ref=profile")),
            job("Acme", Some("https://ACME.com/")),
        ]);

        let described = generator
            .generate(&Node::default(), &profile)
            .await
            .expect("generate");

        assert_eq!(described.generated.description, "Jane builds data platforms.");
        assert_eq!(described.generated.skills.len(), 1);
        assert_eq!(described.webpage_ids, vec![WebpageId::from("w1")]);
        assert!(
            described
                .work_experience
                .iter()
                .all(|e| e.webpage_id == Some(WebpageId::from("w1")))
        );
        assert_eq!(backend.state().webpages.len(), 1);
    }

    #[tokio::test]
    async fn name_only_company_matches_by_similarity() {
        let server = wiremock::MockServer::start().await;
        let backend = FakeBackend::default();
        backend.mount(&server).await;
        backend.insert_webpage(json!({"_id": "w7", "url": "https://globex.com", "name": "Globex Corporation"}));
        backend.insert_webpage(json!({"_id": "w8", "url": "https://globex-foods.com", "name": "Globex Foods"}));
        mount_llm(&server, chat_reply(answer())).await;

        let services = services(&server).await;
        let generator = DescriptionGenerator::new(&services.api, &services.generator);
        let described = generator
            .generate(&Node::default(), &profile_with(vec![job("Globex", None)]))
            .await
            .expect("generate");

        assert_eq!(described.webpage_ids, vec![WebpageId::from("w7")]);
    }

    #[tokio::test]
    async fn context_lookup_failure_degrades() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/api/webpages/by-url"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .with_priority(1)
            .mount(&server)
            .await;
        let backend = FakeBackend::default();
        backend.mount(&server).await;
        mount_llm(&server, chat_reply(answer())).await;

        let services = services(&server).await;
        let generator = DescriptionGenerator::new(&services.api, &services.generator);
        let described = generator
            .generate(&Node::default(), &profile_with(vec![job("Acme", Some("acme.com"))]))
            .await
            .expect("generate");

        assert!(described.webpage_ids.is_empty());
        assert!(backend.state().webpages.is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_not_retried() {
        let server = wiremock::MockServer::start().await;
        FakeBackend::default().mount(&server).await;
        mount_llm(&server, wiremock::ResponseTemplate::new(503)).await;

        let services = services(&server).await;
        let generator = DescriptionGenerator::new(&services.api, &services.generator);
        let err = generator
            .generate(&Node::default(), &profile_with(Vec::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, EnricherError::Generation(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn empty_or_fenced_output() {
        let fenced = "```json\n{\"description\": \"Hi.\"}\n```";
        assert_eq!(parse_generated(fenced).expect("fenced").description, "Hi.");

        let err = parse_generated(r#"{"description": "  "}"#).unwrap_err();
        assert!(err.to_string().contains("empty description"));

        assert!(matches!(
            parse_generated("not json"),
            Err(EnricherError::Generation(_))
        ));
    }
}
