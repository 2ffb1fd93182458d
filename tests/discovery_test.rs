// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - Discovery Source Tests
 * Catalog API paging, field extraction and failure classification against
 * a mock directory server
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use haukka::discovery::{DiscoverySource, WpDirectorySource};
use haukka::errors::SourceError;
use haukka::types::{ScanConfig, SortOrder};
use serde_json::json;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn source_for(server: &MockServer) -> WpDirectorySource {
    WpDirectorySource::with_base_urls(server.uri(), server.uri())
}

#[tokio::test]
async fn test_plugin_page_parsing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("action", "query_plugins"))
        .and(query_param("request[browse]", "popular"))
        .and(query_param("request[page]", "2"))
        .and(query_param("request[per_page]", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "info": {"page": 2, "pages": 50, "results": 5000},
            "plugins": [
                {
                    "slug": "contact-form-thing",
                    "name": "Contact Form Thing",
                    "version": "3.4.1",
                    "active_installs": 40000,
                    "last_updated": "2023-01-09 6:07pm GMT",
                    "tags": {"form": "Form", "contact": "Contact"},
                    "short_description": "Forms for everyone",
                    "tested": "6.1.1",
                    "author": "<a href='https://example.com'>Someone</a>",
                    "rating": 88,
                    "support_threads": 40,
                    "support_threads_resolved": 12,
                    "sections": {"changelog": "3.4.1: fix xss in upload handler"},
                    "download_link": "https://downloads.wordpress.org/plugin/contact-form-thing.3.4.1.zip"
                }
            ]
        })))
        .mount(&server)
        .await;

    let config = ScanConfig {
        sort: SortOrder::Popular,
        ..Default::default()
    };
    let page = source_for(&server).fetch_page(&config, 2).await.unwrap();

    assert_eq!(page.len(), 1);
    let meta = &page[0];
    assert_eq!(meta.slug, "contact-form-thing");
    assert_eq!(meta.active_installs, 40000);
    assert_eq!(meta.tested, "6.1.1");
    assert_eq!(meta.rating, 88);
    assert!(meta.last_updated.is_some());
    assert!(meta.tags.contains(&"form".to_string()));
    assert!(meta.changelog.contains("fix xss"));
}

#[tokio::test]
async fn test_theme_catalog_uses_theme_query() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("action", "query_themes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "themes": [
                {"slug": "darkly", "name": "Darkly", "version": "1.0", "tags": ["dark", "blog"]}
            ]
        })))
        .mount(&server)
        .await;

    let config = ScanConfig {
        themes: true,
        ..Default::default()
    };
    let page = source_for(&server).fetch_page(&config, 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].slug, "darkly");
}

#[tokio::test]
async fn test_rate_limit_is_classified_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let err = source_for(&server)
        .fetch_page(&ScanConfig::default(), 1)
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    match err {
        SourceError::RateLimited { page, retry_after } => {
            assert_eq!(page, 1);
            assert_eq!(retry_after, Some(std::time::Duration::from_secs(7)));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_transient_and_client_error_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let err = source_for(&server)
        .fetch_page(&ScanConfig::default(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Transient { .. }));

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let err = source_for(&server)
        .fetch_page(&ScanConfig::default(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Fatal { .. }));
}

#[tokio::test]
async fn test_malformed_body_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let err = source_for(&server)
        .fetch_page(&ScanConfig::default(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Transient { .. }));
}
