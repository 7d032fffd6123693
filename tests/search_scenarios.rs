//! End-to-end ingestion and search scenarios against a real store

mod common;

use common::{
    hybrid_engine, lexical_engine, slow_engine, test_config, SeededCorpus, UnavailableEmbedder,
};
use quarry::api::{IngestRequest, RequestFilters, SearchRequest};
use quarry::document::NewDocument;
use quarry::error::ErrorKind;
use quarry::retrieval::SearchQuery;
use quarry::storage::Scope;
use quarry::SearchEngine;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_lexical_overlap_beats_quality_prior() {
    let dir = TempDir::new().unwrap();
    let engine = hybrid_engine(&dir).await;

    engine
        .ingest(IngestRequest {
            documents: vec![
                NewDocument::new(
                    "d1",
                    "Machine Learning Basics",
                    "A gentle introduction to neural networks and gradient descent.",
                )
                .with_quality(85.0),
                NewDocument::new(
                    "d2",
                    "Cooking Pasta",
                    "Boil salted water, add the pasta and stir occasionally.",
                )
                .with_quality(90.0),
            ],
            images: vec![],
        })
        .await
        .unwrap();
    engine.refresh().await;

    let response = engine
        .search(&SearchQuery::new("machine learning"))
        .await
        .unwrap();

    assert_eq!(response.results[0].id(), "d1");
    assert_eq!(response.results[0].rank, 1);
    assert!(response.results[0].candidate.lexical_score.is_some());
    for result in &response.results[1..] {
        assert!(result.final_score < response.results[0].final_score);
    }
}

#[tokio::test]
async fn test_bulk_put_reports_invalid_documents() {
    let dir = TempDir::new().unwrap();
    let engine = lexical_engine(&dir).await;

    let result = engine
        .bulk_put(vec![
            NewDocument::new("d3", "", "Body"),
            NewDocument::new("d4", "Valid", "Body"),
        ])
        .await
        .unwrap();

    assert_eq!(result.succeeded, vec!["d4".to_string()]);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].id().as_deref(), Some("d3"));
    assert_eq!(result.failed[0].kind, ErrorKind::ValidationError);
}

#[tokio::test]
async fn test_wrong_dimension_fails_only_that_document() {
    let dir = TempDir::new().unwrap();
    let engine = hybrid_engine(&dir).await;

    let response = engine
        .ingest(IngestRequest {
            documents: vec![
                NewDocument::new("bad", "Vector", "Wrong size").with_embedding(vec![1.0; 3]),
                NewDocument::new("good", "Vector", "Right size"),
            ],
            images: vec![],
        })
        .await
        .unwrap();

    assert_eq!(response.indexed.documents, 1);
    assert_eq!(response.failed.len(), 1);
    assert_eq!(response.failed[0].error, ErrorKind::DimensionMismatch);
    assert_eq!(response.failed[0].error.status_code(), 400);
}

#[tokio::test]
async fn test_pagination_slices_full_ranking() {
    let dir = TempDir::new().unwrap();
    let engine = lexical_engine(&dir).await;

    let docs = (0..35)
        .map(|i| {
            NewDocument::new(
                format!("p{:02}", i),
                format!("Common entry {}", i),
                format!("common {}", "filler ".repeat(i % 7 + 1)),
            )
            .with_quality((i * 3 % 100) as f32)
        })
        .collect();
    engine.bulk_put(docs).await.unwrap();
    engine.refresh().await;

    let all = engine
        .search(&SearchQuery::new("common").with_page(0, 100))
        .await
        .unwrap();
    assert_eq!(all.total, 35);

    let third = engine
        .search(&SearchQuery::new("common").with_page(2, 10))
        .await
        .unwrap();
    let expected: Vec<&str> = all.results[20..30].iter().map(|r| r.id()).collect();
    let actual: Vec<&str> = third.results.iter().map(|r| r.id()).collect();
    assert_eq!(actual, expected);
    assert_eq!(third.total, 35);
    assert!(third.has_more);
    assert_eq!(third.results[0].rank, 21);

    let tail = engine
        .search(&SearchQuery::new("common").with_page(3, 10))
        .await
        .unwrap();
    assert_eq!(tail.results.len(), 5);
    assert!(!tail.has_more);

    let past = engine
        .search(&SearchQuery::new("common").with_page(9, 10))
        .await
        .unwrap();
    assert!(past.results.is_empty());
    assert_eq!(past.total, 35);
}

#[tokio::test]
async fn test_total_counts_matches_beyond_candidate_limit() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.query.candidate_limit = 10;
    let engine = SearchEngine::with_providers(config, None, None).await.unwrap();

    let docs = (0..25)
        .map(|i| NewDocument::new(format!("m{:02}", i), "Match", format!("common {}", i)))
        .collect();
    engine.bulk_put(docs).await.unwrap();
    engine.put(NewDocument::new("other", "Unrelated", "nothing shared")).await.unwrap();
    engine.refresh().await;

    let first = engine
        .search(&SearchQuery::new("common").with_page(0, 10))
        .await
        .unwrap();
    assert_eq!(first.total, 25);
    assert!(first.has_more);

    // Page 2 lies past the candidate limit and still fills from the index
    let tail = engine
        .search(&SearchQuery::new("common").with_page(2, 10))
        .await
        .unwrap();
    assert_eq!(tail.results.len(), 5);
    assert_eq!(tail.total, 25);
    assert!(!tail.has_more);
    assert_eq!(tail.results[0].rank, 21);

    let mut seen: Vec<String> = Vec::new();
    for page in 0..3 {
        let response = engine
            .search(&SearchQuery::new("common").with_page(page, 10))
            .await
            .unwrap();
        seen.extend(response.results.iter().map(|r| r.id().to_string()));
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 25);
    println!("✓ Pages past the candidate limit report every match");
}

#[tokio::test]
async fn test_repeated_search_is_bit_identical() {
    let dir = TempDir::new().unwrap();
    let engine = hybrid_engine(&dir).await;

    let mut corpus = SeededCorpus::new(7);
    engine.bulk_put(corpus.documents(150)).await.unwrap();
    engine.refresh().await;

    let query = SearchQuery::new("vector ranking").with_page(0, 100);
    let snapshot = |response: &quarry::api::SearchResponse| -> Vec<(String, u32)> {
        response
            .results
            .iter()
            .map(|r| (r.id().to_string(), r.final_score.to_bits()))
            .collect()
    };

    let first = engine.search(&query).await.unwrap();
    assert!(!first.results.is_empty());
    for _ in 0..5 {
        let again = engine.search(&query).await.unwrap();
        assert_eq!(snapshot(&again), snapshot(&first));
        assert_eq!(again.total, first.total);
    }
}

#[tokio::test]
async fn test_inline_and_request_filters() {
    let dir = TempDir::new().unwrap();
    let engine = lexical_engine(&dir).await;

    engine
        .bulk_put(vec![
            NewDocument::new("s1", "Neural nets", "neural models")
                .with_category("Science")
                .with_tags(["intro", "ml"]),
            NewDocument::new("s2", "Neural nets advanced", "neural models")
                .with_category("Science")
                .with_tags(["ml"]),
            NewDocument::new("c1", "Neural cooking", "neural recipes").with_category("Food"),
        ])
        .await
        .unwrap();
    engine.refresh().await;

    let ids = |response: quarry::api::SearchResponse| -> Vec<String> {
        let mut ids: Vec<String> = response.results.iter().map(|r| r.id().to_string()).collect();
        ids.sort();
        ids
    };

    let science = engine
        .search(&SearchQuery::new("category:science neural"))
        .await
        .unwrap();
    assert_eq!(ids(science), vec!["s1", "s2"]);

    let tagged = engine
        .search(&SearchQuery::new("neural tag:intro"))
        .await
        .unwrap();
    assert_eq!(ids(tagged), vec!["s1"]);

    // Request filters merge with inline ones
    let request = SearchRequest {
        query: "neural tag:ml".to_string(),
        filters: Some(RequestFilters {
            category: Some("science".to_string()),
            tags: vec!["INTRO".to_string()],
        }),
        page: None,
        page_size: None,
    };
    let merged = engine.search(&SearchQuery::from(request)).await.unwrap();
    assert_eq!(ids(merged), vec!["s1"]);
}

#[tokio::test]
async fn test_content_type_filter_and_image_profile() {
    let dir = TempDir::new().unwrap();
    let engine = lexical_engine(&dir).await;

    engine
        .ingest(IngestRequest {
            documents: vec![NewDocument::new("w1", "Mountain trail", "mountain hiking guide")],
            images: vec![NewDocument::new("i1", "Mountain", "mountain at dusk").with_quality(100.0)],
        })
        .await
        .unwrap();
    engine.refresh().await;

    let images = engine
        .search(&SearchQuery::new("mountain type:image"))
        .await
        .unwrap();
    assert_eq!(images.total, 1);
    assert_eq!(images.results[0].id(), "i1");

    let err = engine
        .search(&SearchQuery::new("mountain type:podcast"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
}

#[tokio::test]
async fn test_invalid_queries_and_arguments() {
    let dir = TempDir::new().unwrap();
    let engine = lexical_engine(&dir).await;
    engine
        .put(NewDocument::new("d1", "Title", "Body"))
        .await
        .unwrap();

    for text in ["", "   ", "the and of", "category:science"] {
        let err = engine.search(&SearchQuery::new(text)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery, "query {:?}", text);
        assert_eq!(err.kind().status_code(), 400);
    }

    for (page, size) in [(-1, 10), (0, 0), (0, 1000)] {
        let err = engine
            .search(&SearchQuery::new("title").with_page(page, size))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
    }

    // No matches is a success, not an error
    let empty = engine.search(&SearchQuery::new("zeppelin")).await.unwrap();
    assert_eq!(empty.total, 0);
    assert!(!empty.has_more);
}

#[tokio::test]
async fn test_unavailable_embedder_degrades_to_lexical() {
    let dir = TempDir::new().unwrap();
    let engine =
        SearchEngine::with_providers(test_config(&dir), Some(Arc::new(UnavailableEmbedder)), None)
            .await
            .unwrap();

    let response = engine
        .ingest(IngestRequest {
            documents: vec![NewDocument::new("d1", "Offline search", "still works")],
            images: vec![],
        })
        .await
        .unwrap();
    assert_eq!(response.indexed.documents, 1);
    assert!(response.failed.is_empty());
    engine.refresh().await;

    let results = engine.search(&SearchQuery::new("offline")).await.unwrap();
    assert_eq!(results.total, 1);
    assert!(results.results[0].candidate.vector_score.is_none());

    let status = engine.status().await.unwrap();
    assert_eq!(status.index.vectors, 0);
}

#[tokio::test]
async fn test_update_replaces_previous_version() {
    let dir = TempDir::new().unwrap();
    let engine = lexical_engine(&dir).await;

    engine
        .put(NewDocument::new("d1", "Original", "alpha content"))
        .await
        .unwrap();
    engine
        .put(NewDocument::new("d1", "Revised", "beta content"))
        .await
        .unwrap();
    engine.refresh().await;

    let old = engine.search(&SearchQuery::new("alpha")).await.unwrap();
    assert_eq!(old.total, 0);

    let new = engine.search(&SearchQuery::new("beta")).await.unwrap();
    assert_eq!(new.total, 1);
    assert_eq!(new.results[0].document().title, "Revised");
    assert_eq!(new.results[0].document().version, 2);
}

#[tokio::test]
async fn test_clear_scopes() {
    let dir = TempDir::new().unwrap();
    let engine = lexical_engine(&dir).await;

    engine
        .ingest(IngestRequest {
            documents: vec![NewDocument::new("w1", "River", "river banks")],
            images: vec![NewDocument::new("i1", "River", "river photo")],
        })
        .await
        .unwrap();

    let cleared = engine.clear(Scope::Documents).await.unwrap();
    assert_eq!(cleared.removed, 1);
    engine.refresh().await;
    let remaining = engine.search(&SearchQuery::new("river")).await.unwrap();
    assert_eq!(remaining.total, 1);
    assert_eq!(remaining.results[0].id(), "i1");

    engine.clear(Scope::All).await.unwrap();
    engine.refresh().await;
    let none = engine.search(&SearchQuery::new("river")).await.unwrap();
    assert_eq!(none.total, 0);
    assert_eq!(engine.status().await.unwrap().documents, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_during_embedding_leaves_no_ghost() {
    let dir = TempDir::new().unwrap();
    let engine = slow_engine(&dir, Duration::from_millis(400)).await;

    let put = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .put(NewDocument::new("ghost", "Phantom", "phantom limb"))
                .await
        })
    };

    // The row is stored well before the batch embedding returns
    tokio::time::sleep(Duration::from_millis(150)).await;
    match engine.delete("ghost").await {
        Ok(()) => {}
        Err(e) => assert_eq!(e.kind(), ErrorKind::NotFound),
    }

    put.await.unwrap().unwrap();
    engine.refresh().await;

    let response = engine.search(&SearchQuery::new("phantom")).await.unwrap();
    assert_eq!(response.total, 0);
    assert!(response.results.is_empty());
    assert_eq!(engine.get("ghost").await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(engine.status().await.unwrap().index.documents, 0);
    println!("✓ Delete during embedding is not undone by the late index commit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clear_during_embedding_leaves_no_ghost() {
    let dir = TempDir::new().unwrap();
    let engine = slow_engine(&dir, Duration::from_millis(400)).await;

    let ingest = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .ingest(IngestRequest {
                    documents: vec![NewDocument::new("w1", "Phantom", "phantom web page")],
                    images: vec![NewDocument::new("i1", "Phantom", "phantom photo")],
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    engine.clear(Scope::All).await.unwrap();

    ingest.await.unwrap().unwrap();
    engine.refresh().await;

    let response = engine.search(&SearchQuery::new("phantom")).await.unwrap();
    assert_eq!(response.total, 0);
    assert_eq!(engine.status().await.unwrap().documents, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bulk_put_reports_index_failures() {
    let dir = TempDir::new().unwrap();
    let engine = slow_engine(&dir, Duration::from_millis(400)).await;

    let bulk = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .bulk_put(vec![
                    NewDocument::new("a1", "Stored", "first body"),
                    NewDocument::new("a2", "Stored", "second body"),
                    NewDocument::new("a3", "", "never stored"),
                ])
                .await
        })
    };

    // Pull the documents table out from under the indexer while it embeds
    tokio::time::sleep(Duration::from_millis(150)).await;
    let conn = rusqlite::Connection::open(dir.path().join("quarry.sqlite")).unwrap();
    conn.busy_timeout(Duration::from_secs(5)).unwrap();
    conn.execute_batch("ALTER TABLE documents RENAME TO documents_lost")
        .unwrap();

    let result = bulk.await.unwrap().unwrap();
    assert!(result.succeeded.is_empty(), "succeeded: {:?}", result.succeeded);

    let mut failed: Vec<(String, ErrorKind)> = result
        .failed
        .iter()
        .map(|f| (f.id().unwrap_or_default(), f.kind))
        .collect();
    failed.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(failed.len(), 3);
    assert_eq!(failed[0].0, "a1");
    assert_eq!(failed[1].0, "a2");
    assert_eq!(failed[2], ("a3".to_string(), ErrorKind::ValidationError));
    assert_ne!(failed[0].1, ErrorKind::ValidationError);
    println!("✓ Index failures are reported as failed, not succeeded");
}
