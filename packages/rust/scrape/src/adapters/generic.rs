//! Generic (fallback) profile adapter.
//!
//! Always matches. Reads public-profile markup by section: a top card with
//! name, headline and location, then experience, education and skills lists.

use std::sync::LazyLock;

use enricher_shared::{Education, WorkExperience};
use scraper::{Html, Selector};

use super::{ProfileAdapter, canonical_url, element_text, first_text, first_text_in};
use crate::Profile;

macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect("valid selector"));
    };
}

selector!(NAME, "h1");
selector!(HEADLINE, ".top-card-layout__headline, [data-section='headline'], .headline");
selector!(LOCATION, ".top-card__subline-item, [data-section='location'], .location");
selector!(ABOUT, "section[data-section='summary'] p, section.summary p, #about p, .about");
selector!(
    EXPERIENCE_ITEM,
    "section[data-section='experience'] li, .experience-item, .experience li"
);
selector!(ITEM_TITLE, "h3, .experience-item__title, .title");
selector!(ITEM_COMPANY, "h4, .experience-item__subtitle, .company");
selector!(ITEM_LINK, "a[href]");
selector!(ITEM_DESCRIPTION, ".show-more-less-text, .description, p");
selector!(
    EDUCATION_ITEM,
    "section[data-section='educationsDetails'] li, .education__list-item, .education li"
);
selector!(SCHOOL, "h3, .school");
selector!(DEGREE, "h4, .degree");
selector!(
    SKILL_ITEM,
    "section[data-section='skills'] li, .skills li, .skill"
);

/// Section-based extraction for arbitrary profile markup.
pub struct GenericAdapter;

impl ProfileAdapter for GenericAdapter {
    fn detect(&self, _doc: &Html) -> bool {
        true
    }

    fn extract(&self, doc: &Html) -> Profile {
        let work_experience = doc
            .select(&EXPERIENCE_ITEM)
            .filter_map(|item| {
                let company_name = first_text_in(&item, &[&ITEM_COMPANY]);
                let title = first_text_in(&item, &[&ITEM_TITLE]);
                if company_name.is_none() && title.is_none() {
                    return None;
                }
                let company_url = item
                    .select(&ITEM_LINK)
                    .filter_map(|a| a.value().attr("href"))
                    .find(|href| href.starts_with("http"))
                    .map(String::from);
                Some(WorkExperience {
                    company_name,
                    company_url,
                    title,
                    description: first_text_in(&item, &[&ITEM_DESCRIPTION]),
                    ..Default::default()
                })
            })
            .collect();

        let education = doc
            .select(&EDUCATION_ITEM)
            .filter_map(|item| {
                let school = first_text_in(&item, &[&SCHOOL])?;
                Some(Education {
                    school: Some(school),
                    degree: first_text_in(&item, &[&DEGREE]),
                    ..Default::default()
                })
            })
            .collect();

        let mut skills: Vec<String> = Vec::new();
        for skill in doc.select(&SKILL_ITEM).filter_map(|el| element_text(&el)) {
            if !skills.contains(&skill) {
                skills.push(skill);
            }
        }

        Profile {
            name: first_text(doc, &[&NAME]),
            headline: first_text(doc, &[&HEADLINE]),
            bio: None,
            about: first_text(doc, &[&ABOUT]),
            location: first_text(doc, &[&LOCATION]),
            profile_url: canonical_url(doc),
            work_experience,
            education,
            skills,
            text: String::new(),
        }
    }

    fn name(&self) -> &str {
        "generic"
    }
}
