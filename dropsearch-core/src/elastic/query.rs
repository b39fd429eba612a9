//! Request bodies sent to Elasticsearch
//!
//! Kept as pure functions so the exact wire shape can be asserted in tests.

use crate::models::SortOrder;
use serde_json::{json, Value};

/// Analyzer applied to `text` at index time (with n-grams)
pub const INDEX_ANALYZER: &str = "custom_analyzer";

/// Analyzer applied to `text` at search time (no n-grams)
pub const SEARCH_ANALYZER: &str = "custom_search_analyzer";

pub const NGRAM_MIN: usize = 3;
pub const NGRAM_MAX: usize = 10;

/// Boost of the filename pattern clause
pub const FILENAME_BOOST: f64 = 2.0;

/// Boost of the fuzzy text clause
pub const TEXT_BOOST: f64 = 1.0;

/// Settings and mappings for index creation
pub fn index_definition(synonyms: &[String]) -> Value {
    json!({
        "settings": {
            "index": {
                "max_ngram_diff": NGRAM_MAX - NGRAM_MIN
            },
            "analysis": {
                "filter": {
                    "synonym_filter": {
                        "type": "synonym",
                        "synonyms": synonyms
                    },
                    "ngram_filter": {
                        "type": "ngram",
                        "min_gram": NGRAM_MIN,
                        "max_gram": NGRAM_MAX
                    }
                },
                "analyzer": {
                    INDEX_ANALYZER: {
                        "type": "custom",
                        "tokenizer": "standard",
                        "filter": ["lowercase", "synonym_filter", "ngram_filter"]
                    },
                    SEARCH_ANALYZER: {
                        "type": "custom",
                        "tokenizer": "standard",
                        "filter": ["lowercase", "synonym_filter"]
                    }
                }
            }
        },
        "mappings": {
            "properties": {
                "filename": { "type": "keyword" },
                "url": { "type": "keyword" },
                "text": {
                    "type": "text",
                    "analyzer": INDEX_ANALYZER,
                    "search_analyzer": SEARCH_ANALYZER
                },
                "createdAt": { "type": "date" }
            }
        }
    })
}

/// Exact-match filename lookup for `_count`
pub fn exists_body(filename: &str) -> Value {
    json!({
        "query": {
            "term": { "filename": filename }
        }
    })
}

/// Search body for a trimmed query string.
///
/// An empty query browses everything by `createdAt`; otherwise the filename
/// pattern and fuzzy text clauses are OR-ed and ranked by score first.
pub fn search_body(query: &str, sort: SortOrder, size: usize) -> Value {
    let created_at = json!({ "createdAt": { "order": sort.as_str() } });

    if query.is_empty() {
        return json!({
            "size": size,
            "sort": [created_at],
            "query": { "match_all": {} },
            "highlight": { "fields": { "text": {} } }
        });
    }

    json!({
        "size": size,
        "sort": [
            { "_score": { "order": "desc" } },
            created_at
        ],
        "query": {
            "bool": {
                "should": [
                    {
                        "regexp": {
                            "filename": {
                                "value": format!(".*{}.*", escape_regexp(query)),
                                "case_insensitive": true,
                                "boost": FILENAME_BOOST
                            }
                        }
                    },
                    {
                        "match": {
                            "text": {
                                "query": query,
                                "analyzer": INDEX_ANALYZER,
                                "fuzziness": "AUTO",
                                "operator": "and",
                                "boost": TEXT_BOOST
                            }
                        }
                    }
                ],
                "minimum_should_match": 1
            }
        },
        "highlight": { "fields": { "text": {} } }
    })
}

/// Escape Lucene regular-expression operators so user input matches literally
pub fn escape_regexp(input: &str) -> String {
    const RESERVED: &[char] = &[
        '.', '?', '+', '*', '|', '{', '}', '[', ']', '(', ')', '"', '\\', '#', '@', '&', '<', '>', '~',
    ];
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
