use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use flipper_app::{
    AppError, CoreContext, CoreOrchestrator, Crawl, CrawlOptions, JsonPageParser,
    RecommendationError, Stores,
};
use flipper_config::{CoreConfig, RecommendationMode, SourceMode};
use flipper_core::service::keys;
use flipper_core::{
    Author, Fandom, FandomFilter, FandomPage, FandomToken, RecommendationList,
    RecommendationParams, RngSnapshot, ScoredStory, Story, StoryId, UserPreferences, get_json,
    put_json,
};
use flipper_events::{Event, TaskState};
use flipper_tasks::{CacheMode, PageTask, TaskKind, TaskRequest};
use flipper_test_support::fetcher::ScriptedFetcher;
use flipper_test_support::fixtures::{StoryBuilder, author, reference_time};
use tokio::net::TcpListener;
use tokio::time::timeout;

const FANDOM_ONE: &str = "https://upstream.test/f/1/";
const FANDOM_TWO: &str = "https://upstream.test/f/2/";
const AUTHOR_URL: &str = "https://upstream.test/u/7/";

fn config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.engine.worker_count = 2;
    config.engine.max_retries = 1;
    config.engine.retry_backoff_ms = 0;
    config
}

fn listing(ids: std::ops::RangeInclusive<i64>, fandom: i64) -> Result<String> {
    let stories: Vec<Story> = ids
        .map(|id| {
            StoryBuilder::new(id)
                .fandoms(&[fandom])
                .recommendations(u32::try_from(100 - id).unwrap_or(0))
                .build()
        })
        .collect();
    Ok(serde_json::to_string(&FandomPage { stories })?)
}

fn upstream() -> Result<ScriptedFetcher> {
    let favourite = author(7, &[1, 2, 3, 4]);
    Ok(ScriptedFetcher::new()
        .with_body(FANDOM_ONE, listing(1..=10, 1)?)
        .with_body(FANDOM_TWO, listing(11..=15, 2)?)
        .with_body(AUTHOR_URL, serde_json::to_string(&favourite)?))
}

fn fandoms() -> Vec<Fandom> {
    [(1, FANDOM_ONE), (2, FANDOM_TWO)]
        .into_iter()
        .map(|(id, url)| Fandom {
            id,
            name: format!("fandom-{id}"),
            url: url.to_owned(),
            tracked: id == 1,
            last_update: None,
        })
        .collect()
}

async fn start(stores: Stores, fetcher: Arc<ScriptedFetcher>) -> Result<CoreOrchestrator> {
    start_with(config(), stores, fetcher).await
}

async fn start_with(
    config: CoreConfig,
    stores: Stores,
    fetcher: Arc<ScriptedFetcher>,
) -> Result<CoreOrchestrator> {
    let ctx = CoreContext::assemble(config, stores, fetcher, Arc::new(JsonPageParser))?
        .with_pinned_time(reference_time());
    Ok(CoreOrchestrator::init(ctx).await?)
}

async fn settle(crawl: Crawl) -> Result<PageTask> {
    Ok(timeout(Duration::from_secs(5), crawl.finished()).await??)
}

/// Orchestrator with both fandoms crawled into its corpus.
async fn seeded() -> Result<(CoreOrchestrator, Arc<ScriptedFetcher>, Stores)> {
    let fetcher = Arc::new(upstream()?);
    let stores = Stores::memory();
    let orchestrator = start(stores.clone(), fetcher.clone()).await?;
    let crawl = orchestrator
        .process_fandoms_as_task(&fandoms(), CrawlOptions::new("seed"))
        .await?;
    let task = settle(crawl).await?;
    assert_eq!(task.state, TaskState::Succeeded);
    Ok((orchestrator, fetcher, stores))
}

fn ids(stories: &[ScoredStory]) -> Vec<StoryId> {
    stories.iter().map(|scored| scored.story.id).collect()
}

fn reader(page_size: u32) -> UserPreferences {
    UserPreferences {
        user_id: "reader".into(),
        page_size,
        ..UserPreferences::default()
    }
}

#[tokio::test]
async fn crawled_fandoms_become_retrievable() -> Result<()> {
    let (orchestrator, _, stores) = seeded().await?;

    assert_eq!(orchestrator.result_count().await?, 15);
    let stored: Option<Fandom> = get_json(stores.corpus.as_ref(), &keys::fandom(1)).await?;
    assert!(stored.and_then(|fandom| fandom.last_update).is_some());

    let page = orchestrator.fetch_display_page(&reader(4)).await?;
    assert_eq!(ids(&page), [1, 2, 3, 4]);
    assert_eq!(orchestrator.page_count(&reader(4)).await?, 3);

    let mut scoped = reader(10);
    scoped.fandom_filter = FandomFilter {
        tokens: vec![FandomToken {
            id: 2,
            include_crossovers: false,
        }],
    };
    let page = orchestrator.fetch_display_page(&scoped).await?;
    assert_eq!(ids(&page), [11, 12, 13, 14, 15]);
    Ok(())
}

#[tokio::test]
async fn invalid_preferences_surface_a_reason() -> Result<()> {
    let (orchestrator, _, _) = seeded().await?;
    let err = orchestrator
        .fetch_display_page(&reader(0))
        .await
        .err()
        .map(|err| err.reason());
    assert_eq!(
        err.as_deref(),
        Some("retrieval failed: invalid filter: record_limit_not_positive")
    );
    Ok(())
}

#[tokio::test]
async fn tracked_fandoms_are_refreshed_from_upstream() -> Result<()> {
    let (orchestrator, fetcher, _) = seeded().await?;
    let Some(crawl) = orchestrator
        .load_tracked_fandoms(None, CacheMode::ForceRefresh)
        .await?
    else {
        bail!("expected a tracked fandom crawl");
    };
    assert_eq!(crawl.task().status().cache_mode, CacheMode::ForceRefresh);
    let task = settle(crawl).await?;
    assert_eq!(task.entries.len(), 1);
    assert_eq!(task.kind, TaskKind::Fandom);
    assert_eq!(fetcher.calls(FANDOM_ONE), 2);
    assert_eq!(fetcher.calls(FANDOM_TWO), 1);
    Ok(())
}

#[tokio::test]
async fn random_pages_do_not_repeat_and_busts_persist() -> Result<()> {
    let (orchestrator, fetcher, stores) = seeded().await?;

    let mut prefs = reader(10);
    let mut seen = BTreeSet::new();
    for page in 0..3 {
        prefs.current_page = page;
        for story in orchestrator.fetch_random_page(&mut prefs, 5, 1).await? {
            assert!(seen.insert(story.story.id), "story repeated before bust");
        }
    }
    assert_eq!(seen.len(), 15);

    prefs.current_page = 0;
    prefs.rng_bust_scheduled = true;
    let after_bust = orchestrator.fetch_random_page(&mut prefs, 5, 1).await?;
    assert!(!prefs.rng_bust_scheduled);
    let stored: Option<RngSnapshot> =
        get_json(stores.users.as_ref(), keys::RNG_STATE_KEY).await?;
    assert!(stored.is_some_and(|snapshot| snapshot.tokens.contains_key("reader")));

    let restarted = start(stores, fetcher).await?;
    let replayed = restarted.fetch_random_page(&mut prefs, 5, 1).await?;
    assert_eq!(ids(&replayed), ids(&after_bust));
    Ok(())
}

#[tokio::test]
async fn remote_busts_reach_the_service_and_survive_restarts() -> Result<()> {
    let (server, _, server_stores) = seeded().await?;
    let Some(local) = server.context().local.clone() else {
        bail!("server runs without a local source");
    };
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(flipper_source::serve(listener, local));

    let mut remote = config();
    remote.source = SourceMode::Remote {
        endpoint: format!("http://{addr}/"),
    };
    let client_stores = Stores::memory();
    let client = start_with(remote.clone(), client_stores.clone(), Arc::new(upstream()?)).await?;

    let mut prefs = reader(10);
    let before = ids(&client.fetch_random_page(&mut prefs, 5, 1).await?);
    assert_eq!(ids(&client.fetch_random_page(&mut prefs, 5, 1).await?), before);

    client.bust_random_sequence("reader").await?;
    let pending: Option<BTreeSet<String>> =
        get_json(client_stores.users.as_ref(), keys::RNG_PENDING_RESETS_KEY).await?;
    assert_eq!(pending, Some(BTreeSet::from(["reader".to_owned()])));

    let restarted = start_with(remote, client_stores.clone(), Arc::new(upstream()?)).await?;
    let after = ids(&restarted.fetch_random_page(&mut prefs, 5, 1).await?);
    assert_ne!(after, before);
    assert_eq!(ids(&restarted.fetch_random_page(&mut prefs, 5, 1).await?), after);
    let pending: Option<BTreeSet<String>> =
        get_json(client_stores.users.as_ref(), keys::RNG_PENDING_RESETS_KEY).await?;
    assert_eq!(pending, Some(BTreeSet::new()));

    let served: Option<RngSnapshot> =
        get_json(server_stores.users.as_ref(), keys::RNG_STATE_KEY).await?;
    assert!(served.is_some_and(|snapshot| snapshot.tokens.contains_key("reader")));
    Ok(())
}

#[tokio::test]
async fn server_fetch_builds_refresh_authors_first() -> Result<()> {
    let fetcher = Arc::new(upstream()?);
    let mut settings = config();
    settings.recommendations = RecommendationMode::ServerFetch;
    let orchestrator = start_with(settings, Stores::memory(), fetcher.clone()).await?;
    let crawl = orchestrator
        .process_fandoms_as_task(&fandoms(), CrawlOptions::new("seed"))
        .await?;
    settle(crawl).await?;
    settle_author(&orchestrator).await?;
    assert_eq!(fetcher.calls(AUTHOR_URL), 1);

    fetcher.set_body(AUTHOR_URL, serde_json::to_string(&author(7, &[1, 2, 3, 4, 5, 6]))?);
    let params = RecommendationParams::new("fresh", BTreeSet::from([1, 2]));
    assert_eq!(orchestrator.build_recommendations(params, false).await?, 4);
    assert_eq!(fetcher.calls(AUTHOR_URL), 2);

    let unrelated = RecommendationParams::new("none", BTreeSet::from([999]));
    match orchestrator.build_recommendations(unrelated, false).await {
        Err(AppError::Recommendation {
            source: RecommendationError::EmptySource { list },
            ..
        }) => assert_eq!(list, "none"),
        other => bail!("expected an empty source, got {other:?}"),
    }
    assert_eq!(fetcher.calls(AUTHOR_URL), 2);
    Ok(())
}

#[tokio::test]
async fn recommendation_lists_are_built_from_loaded_authors() -> Result<()> {
    let (orchestrator, _, stores) = seeded().await?;
    let mut events = orchestrator.context().events.subscribe(None);

    let loaded = orchestrator.load_author(AUTHOR_URL).await?;
    let Some(loaded) = loaded else {
        bail!("author was not loaded");
    };
    assert_eq!(loaded.id, 7);
    assert!(loaded.last_update.is_some());

    let params = RecommendationParams::new("fav", BTreeSet::from([1, 2]));
    assert_eq!(orchestrator.build_local_version(params, true).await?, 2);
    let list: Option<RecommendationList> =
        get_json(stores.corpus.as_ref(), &keys::reclist("fav")).await?;
    let Some(list) = list else {
        bail!("list was not stored");
    };
    assert_eq!(list.matches.keys().copied().collect::<Vec<_>>(), [3, 4]);
    assert_eq!(list.authors, BTreeSet::from([7]));

    let mut built = None;
    while let Some(envelope) = events.try_next() {
        if let Event::RecommendationsBuilt { list, count } = envelope.event {
            built = Some((list, count));
        }
    }
    assert_eq!(built, Some(("fav".to_owned(), 2)));

    let unrelated = RecommendationParams::new("none", BTreeSet::from([999]));
    match orchestrator.build_recommendations(unrelated, true).await {
        Err(AppError::Recommendation {
            source: RecommendationError::EmptySource { list },
            ..
        }) => assert_eq!(list, "none"),
        other => bail!("expected an empty source, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn incremental_builds_only_add_new_authors() -> Result<()> {
    let (orchestrator, _, stores) = seeded().await?;
    let corpus = stores.corpus.as_ref();
    put_json(corpus, &keys::author(1), &author(1, &[1, 5])).await?;
    orchestrator
        .build_local_version(RecommendationParams::new("fav", BTreeSet::from([1])), true)
        .await?;

    put_json(corpus, &keys::author(2), &author(2, &[1, 5, 6])).await?;
    let count = orchestrator
        .build_local_version(RecommendationParams::new("fav", BTreeSet::from([1])), false)
        .await?;
    assert_eq!(count, 2);
    let list: Option<RecommendationList> = get_json(corpus, &keys::reclist("fav")).await?;
    let Some(list) = list else {
        bail!("list was not stored");
    };
    assert_eq!(list.matches.get(&5), Some(&2));
    assert_eq!(list.matches.get(&6), Some(&1));
    assert_eq!(list.authors, BTreeSet::from([1, 2]));
    Ok(())
}

#[tokio::test]
async fn text_lists_report_unrecognized_lines() -> Result<()> {
    let (orchestrator, fetcher, _) = seeded().await?;
    settle_author(&orchestrator).await?;
    let mut events = orchestrator.context().events.subscribe(None);

    let count = orchestrator
        .process_list_into_recommendations(
            "from-text",
            "# liked\n1\nnot-a-story\nhttps://upstream.test/s/2/1/\n",
        )
        .await?;
    assert_eq!(count, 2);

    let mut messages = Vec::new();
    while let Some(envelope) = events.try_next() {
        if let Event::Info { message } = envelope.event {
            messages.push(message);
        }
    }
    assert_eq!(messages, ["skipped unrecognized source line: not-a-story"]);

    let Some(crawl) = orchestrator
        .load_more_authors("from-text", CacheMode::ForceRefresh)
        .await?
    else {
        bail!("expected an author crawl");
    };
    settle(crawl).await?;
    assert_eq!(fetcher.calls(AUTHOR_URL), 2);

    match orchestrator
        .load_more_authors("missing", CacheMode::UseCache)
        .await
    {
        Err(AppError::NotFound { kind, key }) => {
            assert_eq!(kind, "recommendation_list");
            assert_eq!(key, "missing");
        }
        Err(other) => bail!("expected not found, got {other:?}"),
        Ok(_) => bail!("expected not found"),
    }
    Ok(())
}

async fn settle_author(orchestrator: &CoreOrchestrator) -> Result<Author> {
    match orchestrator.load_author(AUTHOR_URL).await? {
        Some(author) => Ok(author),
        None => bail!("author was not loaded"),
    }
}

#[tokio::test]
async fn init_resumes_interrupted_crawls_but_not_cancelled_ones() -> Result<()> {
    let stores = Stores::memory();
    let interrupted = PageTask::from_request(TaskRequest::new(
        TaskKind::Fandom,
        "interrupted",
        vec![FANDOM_ONE.to_owned(), FANDOM_TWO.to_owned()],
    ));
    let mut cancelled = PageTask::from_request(TaskRequest::new(
        TaskKind::Fandom,
        "cancelled",
        vec![FANDOM_TWO.to_owned()],
    ));
    cancelled.cancelled = true;
    cancelled.state = TaskState::Cancelled;
    for task in [&interrupted, &cancelled] {
        put_json(stores.tasks.as_ref(), &keys::page_task(task.id), task).await?;
    }

    let orchestrator = start(stores, Arc::new(upstream()?)).await?;
    let resumed = orchestrator.take_resumed();
    assert_eq!(resumed.len(), 1);
    assert!(orchestrator.take_resumed().is_empty());

    let mut finished = Vec::new();
    for crawl in resumed {
        finished.push(settle(crawl).await?);
    }
    assert_eq!(finished[0].id, interrupted.id);
    assert_eq!(finished[0].state, TaskState::Succeeded);
    assert_eq!(orchestrator.result_count().await?, 15);

    let still_cancelled = orchestrator.context().engine.get(cancelled.id).await?;
    assert_eq!(
        still_cancelled.map(|task| task.state),
        Some(TaskState::Cancelled)
    );
    Ok(())
}
