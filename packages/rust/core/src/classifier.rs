//! Keyword classification over an ordered category table.
//!
//! Categories are tried in declaration order and keywords in list order; the
//! first keyword found in the record text decides the category. The order is
//! the tie-break when a text matches several categories, so it must come from
//! an ordered list, never a map.

use tracing::debug;

use tenderscope_shared::{CategoryConfig, Opportunity, Source};

/// Winning category and keyword for one text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: String,
    pub keyword: String,
}

#[derive(Debug, Clone)]
struct Category {
    name: String,
    /// `(as configured, lower-cased)` pairs in match order.
    keywords: Vec<(String, String)>,
}

/// Records split by whether they matched a category.
#[derive(Debug, Default)]
pub struct ClassifiedBatch {
    /// Matching records with `category` and `matched_keywords` set.
    pub kept: Vec<Opportunity>,
    /// Records that matched nothing.
    pub filtered_out: usize,
}

/// Deterministic first-match classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    categories: Vec<Category>,
}

impl Classifier {
    pub fn new(categories: &[CategoryConfig]) -> Self {
        let categories = categories
            .iter()
            .map(|c| Category {
                name: c.name.clone(),
                keywords: c
                    .keywords
                    .iter()
                    .map(|k| k.trim())
                    .filter(|k| !k.is_empty())
                    .map(|k| (k.to_string(), k.to_lowercase()))
                    .collect(),
            })
            .collect();
        Self { categories }
    }

    /// First category, first keyword whose lower-cased form occurs in `text`.
    pub fn classify(&self, text: &str) -> Option<Classification> {
        let haystack = text.to_lowercase();
        self.categories.iter().find_map(|category| {
            category
                .keywords
                .iter()
                .find(|(_, needle)| haystack.contains(needle.as_str()))
                .map(|(keyword, _)| Classification {
                    category: category.name.clone(),
                    keyword: keyword.clone(),
                })
        })
    }

    /// Classify a record by its description.
    ///
    /// Open-data hits whose text lacks every keyword fall back to the keyword
    /// that surfaced them in the search, so no search hit is dropped.
    pub fn classify_record(&self, op: &Opportunity) -> Option<Classification> {
        self.classify(&op.description).or_else(|| match (op.source, &op.search_keyword) {
            (Source::OpenData, Some(keyword)) => self.classify(keyword).map(|hit| Classification {
                category: hit.category,
                keyword: keyword.clone(),
            }),
            _ => None,
        })
    }

    /// Classify every record, keeping only matches.
    pub fn apply(&self, records: Vec<Opportunity>) -> ClassifiedBatch {
        let mut batch = ClassifiedBatch::default();
        for mut op in records {
            match self.classify_record(&op) {
                Some(hit) => {
                    debug!(id = %op.id, category = %hit.category, keyword = %hit.keyword, "classified");
                    op.category = Some(hit.category);
                    op.matched_keywords = vec![hit.keyword];
                    batch.kept.push(op);
                }
                None => batch.filtered_out += 1,
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenderscope_shared::default_categories;

    fn classifier() -> Classifier {
        Classifier::new(&default_categories())
    }

    #[test]
    fn software_example() {
        let hit = classifier()
            .classify("Implementación de software de gestión")
            .unwrap();
        assert_eq!(hit.category, "Software Development");
        assert_eq!(hit.keyword, "software");
    }

    #[test]
    fn matching_is_case_insensitive_including_accents() {
        let hit = classifier()
            .classify("SERVICIO DE CIBERSEGURIDAD PERIMETRAL")
            .unwrap();
        assert_eq!(hit.category, "Cybersecurity");

        let hit = classifier().classify("ANÁLISIS ESTADÍSTICO de encuestas").unwrap();
        assert_eq!(hit.category, "Data & AI");
    }

    #[test]
    fn declaration_order_breaks_ties() {
        // Matches both "software" (first category) and "ciberseguridad".
        let hit = classifier()
            .classify("Ciberseguridad para el software institucional")
            .unwrap();
        assert_eq!(hit.category, "Software Development");

        let reordered = Classifier::new(&[
            CategoryConfig {
                name: "B".into(),
                keywords: vec!["ciberseguridad".into()],
            },
            CategoryConfig {
                name: "A".into(),
                keywords: vec!["software".into()],
            },
        ]);
        let hit = reordered
            .classify("Ciberseguridad para el software institucional")
            .unwrap();
        assert_eq!(hit.category, "B");
    }

    #[test]
    fn keyword_order_within_category() {
        let hit = classifier()
            .classify("Plataforma digital y aplicativo móvil")
            .unwrap();
        assert_eq!(hit.keyword, "plataforma digital");
    }

    #[test]
    fn classification_is_deterministic() {
        let c = classifier();
        let text = "Consultoría tecnológica con inteligencia artificial";
        let first = c.classify(text);
        for _ in 0..10 {
            assert_eq!(c.classify(text), first);
        }
    }

    #[test]
    fn apply_filters_and_annotates() {
        let mut a = Opportunity::new("NC-1", Source::Listing);
        a.description = "Mesa de ayuda y soporte técnico".into();
        let mut b = Opportunity::new("NC-2", Source::Listing);
        b.description = "Adquisición de uniformes".into();
        let mut c = Opportunity::new("ocds-1", Source::OpenData);
        c.description = "Sistema de gestión documental".into();

        let batch = classifier().apply(vec![a, b, c]);
        assert_eq!(batch.filtered_out, 1);
        assert_eq!(batch.kept.len(), 2);
        assert_eq!(batch.kept[0].category.as_deref(), Some("IT Consulting & Support"));
        assert_eq!(batch.kept[0].matched_keywords, vec!["soporte técnico".to_string()]);
        assert_eq!(batch.kept[1].category.as_deref(), Some("Software Development"));
    }

    #[test]
    fn open_data_hit_keeps_its_search_keyword() {
        let mut hit = Opportunity::new("ocds-7", Source::OpenData);
        hit.description = "Contratación de servicios de soporte institucional".into();
        hit.search_keyword = Some("software".into());
        let mut row = Opportunity::new("NC-7", Source::Listing);
        row.description = hit.description.clone();
        row.search_keyword = Some("software".into());

        let batch = classifier().apply(vec![hit, row]);
        assert_eq!(batch.filtered_out, 1);
        assert_eq!(batch.kept.len(), 1);
        assert_eq!(batch.kept[0].id, "ocds-7");
        assert_eq!(batch.kept[0].category.as_deref(), Some("Software Development"));
        assert_eq!(batch.kept[0].matched_keywords, vec!["software".to_string()]);
    }

    #[test]
    fn open_data_text_match_wins_over_search_keyword() {
        let mut hit = Opportunity::new("ocds-8", Source::OpenData);
        hit.description = "Servicio de ciberseguridad".into();
        hit.search_keyword = Some("software".into());

        let found = classifier().classify_record(&hit).unwrap();
        assert_eq!(found.category, "Cybersecurity");
        assert_eq!(found.keyword, "ciberseguridad");
    }
}
