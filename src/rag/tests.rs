//! Regression tests for the retrieval pipeline as a whole:
//! - `embedder`: determinism and empty-input rejection
//! - `index`: pairing, threshold law, empty build, save/load round trip
//! - `context`: citation dedup and the character budget
//! - `scenario`: the version question against a three-chunk index

#[cfg(test)]
mod fixtures {
    use crate::rag::{Chunk, SearchResult};

    pub fn chunk(text: &str, source: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            source: source.to_string(),
            title: String::new(),
            sequence_index: 0,
            category: "general".to_string(),
        }
    }

    pub fn hit(text: &str, source: &str, score: f32, position: usize) -> SearchResult {
        SearchResult {
            chunk: chunk(text, source),
            score,
            position,
        }
    }

    pub fn scenario_chunks() -> Vec<Chunk> {
        vec![
            chunk("Nextflow 23.10.0 released", "U1"),
            chunk("Install via conda", "U2"),
            chunk("Use DSL2 syntax", "U1"),
        ]
    }

    pub fn corpus_chunks() -> Vec<Chunk> {
        [
            ("Channels connect processes in a pipeline", "c"),
            ("Queue channels are consumed by one process", "c"),
            ("The SLURM executor submits tasks with sbatch", "e"),
            ("Executors can be set per process in the config", "e"),
            ("Config profiles group executor and container settings", "p"),
            ("Conda environments can be declared per process", "k"),
            ("Docker and Singularity containers isolate tools", "k"),
            ("Workflow outputs are published with publishDir", "o"),
        ]
        .iter()
        .map(|(text, source)| chunk(text, source))
        .collect()
    }
}

#[cfg(test)]
mod embedder_tests {
    use crate::embedding::{create_embedder, Embedder, EmbeddingError, EmbeddingSettings};

    #[test]
    fn embedding_twice_is_identical() {
        let embedder = create_embedder(&EmbeddingSettings::default()).unwrap();
        for text in ["process", "What is the latest Nextflow version?", "é ü ß 23.10"] {
            assert_eq!(embedder.embed(text).unwrap(), embedder.embed(text).unwrap());
        }
    }

    #[test]
    fn empty_text_is_a_validation_error() {
        let embedder = create_embedder(&EmbeddingSettings::default()).unwrap();
        assert!(matches!(embedder.embed(""), Err(EmbeddingError::EmptyInput)));
    }

    #[test]
    fn batch_matches_single_embedding() {
        let embedder = create_embedder(&EmbeddingSettings::default()).unwrap();
        let texts = vec!["channels".to_string(), "executors".to_string()];
        let batch = embedder.embed_batch(&texts).unwrap();
        assert_eq!(batch[0], embedder.embed("channels").unwrap());
        assert_eq!(batch[1], embedder.embed("executors").unwrap());
    }

    #[test]
    fn batch_names_the_empty_item() {
        let embedder = create_embedder(&EmbeddingSettings::default()).unwrap();
        let texts = vec!["ok".to_string(), " ".to_string()];
        assert!(matches!(
            embedder.embed_batch(&texts),
            Err(EmbeddingError::EmptyBatchItem(1))
        ));
    }
}

#[cfg(test)]
mod index_tests {
    use super::fixtures::{corpus_chunks, scenario_chunks};
    use crate::embedding::{Embedder, HashingEmbedder};
    use crate::rag::{persist, BuildOptions, RetrievalError, VectorIndex};
    use tempfile::TempDir;

    fn build(embedder: &HashingEmbedder) -> VectorIndex {
        VectorIndex::build(corpus_chunks(), embedder, BuildOptions::default()).unwrap()
    }

    // ---------------------------------------------------------------
    // Pairing
    // ---------------------------------------------------------------

    #[test]
    fn metadata_and_vectors_pair_after_build_and_load() {
        let embedder = HashingEmbedder::new(96).unwrap();
        let index = build(&embedder);
        assert_eq!(index.chunks().len(), index.vector_count());

        let dir = TempDir::new().unwrap();
        let base = dir.path().join("docs.index");
        persist::save(&index, &base).unwrap();
        let loaded = persist::load(&base).unwrap();
        assert_eq!(loaded.chunks().len(), loaded.vector_count());
        assert_eq!(loaded.vector_count(), index.vector_count());
    }

    // ---------------------------------------------------------------
    // Threshold law
    // ---------------------------------------------------------------

    #[test]
    fn every_result_clears_threshold_in_descending_order() {
        let embedder = HashingEmbedder::new(96).unwrap();
        let index = build(&embedder);
        let queries = [
            "executor for process",
            "channels",
            "containers and conda",
            "nothing relevant here zzz",
        ];

        for query in queries {
            let vector = embedder.embed(query).unwrap();
            for (top_k, min_score) in [(1, 0.0), (3, 0.1), (5, 0.3), (8, -1.0)] {
                let results = index.query(&vector, top_k, min_score).unwrap();
                assert!(results.len() <= top_k);
                assert!(results.iter().all(|r| r.score >= min_score));
                assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
            }
        }
    }

    #[test]
    fn no_match_is_an_empty_result_not_an_error() {
        let embedder = HashingEmbedder::new(96).unwrap();
        let index = build(&embedder);
        let vector = embedder.embed("channels").unwrap();
        assert!(index.query(&vector, 5, 1.1).unwrap().is_empty());
    }

    #[test]
    fn repeated_queries_rank_identically() {
        let embedder = HashingEmbedder::new(96).unwrap();
        let index = build(&embedder);
        let vector = embedder.embed("process executor config").unwrap();
        assert_eq!(
            index.query(&vector, 8, -1.0).unwrap(),
            index.query(&vector, 8, -1.0).unwrap()
        );
    }

    // ---------------------------------------------------------------
    // Empty corpus
    // ---------------------------------------------------------------

    #[test]
    fn empty_build_is_a_configuration_error() {
        let embedder = HashingEmbedder::new(96).unwrap();
        let err = VectorIndex::build(Vec::new(), &embedder, BuildOptions::default()).unwrap_err();
        assert!(matches!(err, RetrievalError::EmptyIndex));
        assert!(err.is_configuration());
    }

    // ---------------------------------------------------------------
    // Round trip
    // ---------------------------------------------------------------

    #[test]
    fn loaded_index_answers_like_the_original() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let index = VectorIndex::build(scenario_chunks(), &embedder, BuildOptions::default()).unwrap();
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("round.index");
        persist::save(&index, &base).unwrap();
        let loaded = persist::load(&base).unwrap();

        let question = embedder.embed("What is the latest Nextflow version?").unwrap();
        let before = index.query(&question, 3, -1.0).unwrap();
        let after = loaded.query(&question, 3, -1.0).unwrap();
        assert_eq!(before.len(), after.len());
        for (left, right) in before.iter().zip(&after) {
            assert_eq!(left.chunk, right.chunk);
            assert!((left.score - right.score).abs() <= 1e-6);
        }
    }
}

#[cfg(test)]
mod context_tests {
    use super::fixtures::hit;
    use crate::rag::{CitationRef, ContextAssembler, BLOCK_DELIMITER};

    #[test]
    fn citations_collapse_repeated_urls() {
        let results = vec![
            hit("a1", "A", 0.9, 0),
            hit("a2", "A", 0.8, 1),
            hit("b1", "B", 0.7, 2),
            hit("a3", "A", 0.6, 3),
            hit("b2", "B", 0.5, 4),
        ];
        let (_, citations) = ContextAssembler::new(100_000).assemble(&results);
        assert_eq!(
            citations,
            vec![
                CitationRef {
                    index: 1,
                    url: "A".to_string()
                },
                CitationRef {
                    index: 2,
                    url: "B".to_string()
                },
            ]
        );
    }

    #[test]
    fn context_never_exceeds_budget_or_cuts_a_passage() {
        let passages: Vec<String> = (0..12).map(|i| format!("passage {i} ").repeat(i + 3)).collect();
        let results: Vec<_> = passages
            .iter()
            .enumerate()
            .map(|(i, text)| hit(text, &format!("url-{}", i % 4), 1.0 - i as f32 * 0.05, i))
            .collect();

        for budget in [0, 10, 50, 120, 300, 700, 5_000] {
            let (context, citations) = ContextAssembler::new(budget).assemble(&results);
            assert!(context.chars().count() <= budget, "budget {budget}");

            // Every included passage appears whole; blocks are delimited cleanly.
            let blocks: Vec<&str> = if context.is_empty() {
                Vec::new()
            } else {
                context.split(BLOCK_DELIMITER).collect()
            };
            for (block, passage) in blocks.iter().zip(&passages) {
                assert!(block.contains(passage.trim()), "budget {budget}");
            }
            // Citations cover the included passages only.
            let included_sources: std::collections::HashSet<String> = (0..blocks.len())
                .map(|i| format!("url-{}", i % 4))
                .collect();
            assert_eq!(citations.len(), included_sources.len());
        }
    }
}

#[cfg(test)]
mod scenario_tests {
    use super::fixtures::scenario_chunks;
    use crate::embedding::{Embedder, HashingEmbedder};
    use crate::rag::{BuildOptions, ContextAssembler, VectorIndex};

    #[test]
    fn version_question_finds_release_chunk() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let index = VectorIndex::build(scenario_chunks(), &embedder, BuildOptions::default()).unwrap();
        let query = embedder.embed("What is the latest Nextflow version?").unwrap();

        let results = index.query(&query, 2, 0.3).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.text, "Nextflow 23.10.0 released");

        let (context, citations) = ContextAssembler::default().assemble(&results);
        assert!(context.contains("23.10.0"));
        let u1_citations = citations.iter().filter(|c| c.url == "U1").count();
        assert_eq!(u1_citations, 1);
        assert_eq!(citations[0].url, "U1");
    }
}
