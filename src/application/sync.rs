//! Client-side session state and optimistic mutation handling.
//!
//! Every mutation goes through three phases: `begin_*` applies the change to the
//! local snapshot and returns a [`PendingMutation`], [`MutationDispatcher::dispatch`]
//! performs the remote call, and [`DashboardSession::reconcile`] folds the outcome
//! back in. A failure only reverts local state while the mutation is still the
//! latest one issued for its entity.

use crate::domain::metrics::{compute_metrics, DashboardMetrics};
use crate::domain::models::{
    events_on_day, normalize_accent, validate_non_empty, Event, EventPatch, NewEvent, Task,
    TaskPatch, ThemeSettings,
};
use crate::domain::timer::{TimerError, TimerEvent, TimerPhase, TimerState};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::dashboard_client::{DashboardClient, ReqwestDashboardClient};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_gate::NowProvider;
use crate::infrastructure::settings_cache::{
    InMemorySettingsCache, JsonFileSettingsCache, SettingsCache,
};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, or runs out of attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    retry_policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, InfraError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InfraError>>,
{
    let max_attempts = retry_policy.max_attempts.max(1);
    let mut attempt: u8 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt + 1 < max_attempts => {
                let delay = retry_policy
                    .base_delay_ms
                    .saturating_mul(2u64.saturating_pow(attempt as u32));
                tracing::warn!(attempt = attempt + 1, delay_ms = delay, "retrying after {error}");
                sleep(TokioDuration::from_millis(delay)).await;
                attempt = attempt.saturating_add(1);
            }
            Err(error) => return Err(error),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardSnapshot {
    pub tasks: Vec<Task>,
    pub events: Vec<Event>,
    pub settings: ThemeSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Task(i64),
    Event(i64),
    Settings,
}

#[derive(Debug, Clone)]
enum MutationKind {
    CreateTask { provisional_id: i64, title: String },
    UpdateTask { id: i64, patch: TaskPatch, previous: Task },
    DeleteTask { previous: Task },
    CreateEvent { provisional_id: i64, event: NewEvent },
    UpdateEvent { id: i64, patch: EventPatch, previous: Event },
    DeleteEvent { previous: Event },
    SaveSettings { settings: ThemeSettings, previous: ThemeSettings },
}

/// A local change that has been applied optimistically and awaits its remote outcome.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    correlation_id: u64,
    entity: EntityKey,
    sequence: u64,
    epoch: u64,
    kind: MutationKind,
}

impl PendingMutation {
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    pub fn entity(&self) -> EntityKey {
        self.entity
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn name(&self) -> &'static str {
        match self.kind {
            MutationKind::CreateTask { .. } => "create_task",
            MutationKind::UpdateTask { .. } => "update_task",
            MutationKind::DeleteTask { .. } => "delete_task",
            MutationKind::CreateEvent { .. } => "create_event",
            MutationKind::UpdateEvent { .. } => "update_event",
            MutationKind::DeleteEvent { .. } => "delete_event",
            MutationKind::SaveSettings { .. } => "save_settings",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    TaskCreated(Task),
    EventCreated(Event),
    Acknowledged,
}

/// Performs the remote half of a mutation. Holds no session state, so a caller
/// can keep issuing local changes while a dispatch is in flight.
pub struct MutationDispatcher<C>
where
    C: DashboardClient,
{
    client: Arc<C>,
    retry_policy: RetryPolicy,
}

impl<C> Clone for MutationDispatcher<C>
where
    C: DashboardClient,
{
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            retry_policy: self.retry_policy.clone(),
        }
    }
}

impl<C> MutationDispatcher<C>
where
    C: DashboardClient,
{
    pub async fn dispatch(&self, pending: &PendingMutation) -> Result<MutationOutcome, InfraError> {
        let client = &self.client;
        let policy = &self.retry_policy;
        match &pending.kind {
            MutationKind::CreateTask { title, .. } => {
                retry_with_backoff(policy, move || client.create_task(title))
                    .await
                    .map(MutationOutcome::TaskCreated)
            }
            MutationKind::UpdateTask { id, patch, .. } => {
                retry_with_backoff(policy, move || client.update_task(*id, patch)).await?;
                Ok(MutationOutcome::Acknowledged)
            }
            MutationKind::DeleteTask { previous, .. } => {
                retry_with_backoff(policy, move || client.delete_task(previous.id)).await?;
                Ok(MutationOutcome::Acknowledged)
            }
            MutationKind::CreateEvent { event, .. } => {
                retry_with_backoff(policy, move || client.create_event(event))
                    .await
                    .map(MutationOutcome::EventCreated)
            }
            MutationKind::UpdateEvent { id, patch, .. } => {
                retry_with_backoff(policy, move || client.update_event(*id, patch)).await?;
                Ok(MutationOutcome::Acknowledged)
            }
            MutationKind::DeleteEvent { previous } => {
                retry_with_backoff(policy, move || client.delete_event(previous.id)).await?;
                Ok(MutationOutcome::Acknowledged)
            }
            MutationKind::SaveSettings { settings, .. } => {
                retry_with_backoff(policy, move || client.save_settings(settings)).await?;
                Ok(MutationOutcome::Acknowledged)
            }
        }
    }
}

pub struct DashboardSession<C>
where
    C: DashboardClient,
{
    client: Arc<C>,
    dispatcher: MutationDispatcher<C>,
    cache: Arc<dyn SettingsCache>,
    snapshot: DashboardSnapshot,
    timer: TimerState,
    timezone: Tz,
    versions: HashMap<EntityKey, u64>,
    in_flight: BTreeMap<u64, PendingMutation>,
    next_correlation_id: u64,
    next_provisional_id: i64,
    epoch: u64,
    now_provider: NowProvider,
}

impl DashboardSession<ReqwestDashboardClient> {
    /// Session against a live API, caching settings under the configured directory.
    pub fn connect(config: &ClientConfig) -> Self {
        let client = Arc::new(ReqwestDashboardClient::new(
            config.api_url.clone(),
            config.session_token.clone(),
        ));
        let cache: Arc<dyn SettingsCache> = match &config.cache_dir {
            Some(cache_dir) => Arc::new(JsonFileSettingsCache::new(cache_dir)),
            None => Arc::new(InMemorySettingsCache::default()),
        };
        Self::new(client, cache, config.timezone)
    }
}

impl<C> DashboardSession<C>
where
    C: DashboardClient,
{
    pub fn new(client: Arc<C>, cache: Arc<dyn SettingsCache>, timezone: Tz) -> Self {
        let settings = match cache.load() {
            Ok(cached) => cached.unwrap_or_default(),
            Err(error) => {
                tracing::warn!("ignoring unreadable settings cache: {error}");
                ThemeSettings::default()
            }
        };
        Self {
            dispatcher: MutationDispatcher {
                client: Arc::clone(&client),
                retry_policy: RetryPolicy::default(),
            },
            client,
            cache,
            snapshot: DashboardSnapshot {
                settings,
                ..DashboardSnapshot::default()
            },
            timer: TimerState::default(),
            timezone,
            versions: HashMap::new(),
            in_flight: BTreeMap::new(),
            next_correlation_id: 1,
            next_provisional_id: -1,
            epoch: 0,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.dispatcher.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_timer(mut self, timer: TimerState) -> Self {
        self.timer = timer;
        self
    }

    pub fn snapshot(&self) -> &DashboardSnapshot {
        &self.snapshot
    }

    pub fn tasks(&self) -> &[Task] {
        &self.snapshot.tasks
    }

    pub fn events(&self) -> &[Event] {
        &self.snapshot.events
    }

    pub fn settings(&self) -> &ThemeSettings {
        &self.snapshot.settings
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn pending_mutations(&self) -> usize {
        self.in_flight.len()
    }

    pub fn dispatcher(&self) -> MutationDispatcher<C> {
        self.dispatcher.clone()
    }

    /// Fetches all three slices concurrently. Each successful slice replaces the
    /// local copy with in-flight changes replayed on top; the first failure is
    /// returned after the successes are applied.
    pub async fn load(&mut self) -> Result<(), InfraError> {
        let shared = Arc::clone(&self.client);
        let client = shared.as_ref();
        let policy = self.dispatcher.retry_policy.clone();
        let (tasks, events, settings) = tokio::join!(
            retry_with_backoff(&policy, move || client.list_tasks()),
            retry_with_backoff(&policy, move || client.list_events()),
            retry_with_backoff(&policy, move || client.get_settings()),
        );

        let mut errors = Vec::new();
        let (tasks_loaded, events_loaded, settings_loaded) =
            (tasks.is_ok(), events.is_ok(), settings.is_ok());
        match tasks {
            Ok(tasks) => {
                let provisional = self
                    .snapshot
                    .tasks
                    .drain(..)
                    .filter(|task| task.id < 0)
                    .collect::<Vec<_>>();
                self.snapshot.tasks = provisional.into_iter().chain(tasks).collect();
            }
            Err(error) => errors.push(error),
        }
        match events {
            Ok(events) => {
                let provisional = self
                    .snapshot
                    .events
                    .drain(..)
                    .filter(|event| event.id < 0)
                    .collect::<Vec<_>>();
                self.snapshot.events = events;
                self.snapshot.events.extend(provisional);
                sort_events(&mut self.snapshot.events);
            }
            Err(error) => errors.push(error),
        }
        match settings {
            Ok(settings) => self.snapshot.settings = settings.theme(),
            Err(error) => errors.push(error),
        }
        self.replay_in_flight(tasks_loaded, events_loaded, settings_loaded);
        if settings_loaded {
            self.write_cache(&self.snapshot.settings);
        }

        // A rejected session outranks any other failure.
        let failure = match errors
            .iter()
            .position(|error| matches!(error, InfraError::Unauthenticated))
        {
            Some(index) => Some(errors.swap_remove(index)),
            None => errors.into_iter().next(),
        };
        match failure {
            Some(error) => {
                tracing::warn!("dashboard load incomplete: {error}");
                Err(error)
            }
            None => {
                tracing::info!(
                    tasks = self.snapshot.tasks.len(),
                    events = self.snapshot.events.len(),
                    "dashboard loaded"
                );
                Ok(())
            }
        }
    }

    pub fn begin_create_task(&mut self, title: &str) -> Result<PendingMutation, InfraError> {
        validate_non_empty(title, "title").map_err(InfraError::Validation)?;
        let title = title.trim().to_string();
        let provisional_id = self.next_provisional_id();
        self.snapshot.tasks.insert(
            0,
            Task {
                id: provisional_id,
                user_id: String::new(),
                title: title.clone(),
                done: false,
                created_at: (self.now_provider)(),
            },
        );
        Ok(self.track(
            EntityKey::Task(provisional_id),
            MutationKind::CreateTask {
                provisional_id,
                title,
            },
        ))
    }

    pub fn begin_update_task(
        &mut self,
        id: i64,
        patch: TaskPatch,
    ) -> Result<PendingMutation, InfraError> {
        patch.validate().map_err(InfraError::Validation)?;
        let index = self.task_index(id)?;
        let previous = self.snapshot.tasks[index].clone();
        let merged = patch.merge(&previous).map_err(InfraError::Validation)?;
        self.snapshot.tasks[index] = merged;
        Ok(self.track(
            EntityKey::Task(id),
            MutationKind::UpdateTask {
                id,
                patch,
                previous,
            },
        ))
    }

    pub fn begin_toggle_task(&mut self, id: i64) -> Result<PendingMutation, InfraError> {
        let index = self.task_index(id)?;
        let done = !self.snapshot.tasks[index].done;
        self.begin_update_task(
            id,
            TaskPatch {
                title: None,
                done: Some(done),
            },
        )
    }

    pub fn begin_delete_task(&mut self, id: i64) -> Result<PendingMutation, InfraError> {
        let index = self.task_index(id)?;
        let previous = self.snapshot.tasks.remove(index);
        Ok(self.track(
            EntityKey::Task(id),
            MutationKind::DeleteTask { previous },
        ))
    }

    pub fn begin_create_event(&mut self, event: NewEvent) -> Result<PendingMutation, InfraError> {
        event.validate().map_err(InfraError::Validation)?;
        let event = NewEvent {
            title: event.title.trim().to_string(),
            ..event
        };
        let provisional_id = self.next_provisional_id();
        self.snapshot.events.push(Event {
            id: provisional_id,
            user_id: String::new(),
            title: event.title.clone(),
            start: event.start,
            end: event.end,
        });
        sort_events(&mut self.snapshot.events);
        Ok(self.track(
            EntityKey::Event(provisional_id),
            MutationKind::CreateEvent {
                provisional_id,
                event,
            },
        ))
    }

    pub fn begin_update_event(
        &mut self,
        id: i64,
        patch: EventPatch,
    ) -> Result<PendingMutation, InfraError> {
        patch.validate().map_err(InfraError::Validation)?;
        let index = self.event_index(id)?;
        let previous = self.snapshot.events[index].clone();
        let merged = patch.merge(&previous).map_err(InfraError::Validation)?;
        self.snapshot.events[index] = merged;
        sort_events(&mut self.snapshot.events);
        Ok(self.track(
            EntityKey::Event(id),
            MutationKind::UpdateEvent {
                id,
                patch,
                previous,
            },
        ))
    }

    pub fn begin_delete_event(&mut self, id: i64) -> Result<PendingMutation, InfraError> {
        let index = self.event_index(id)?;
        let previous = self.snapshot.events.remove(index);
        Ok(self.track(EntityKey::Event(id), MutationKind::DeleteEvent { previous }))
    }

    pub fn begin_save_settings(
        &mut self,
        settings: ThemeSettings,
    ) -> Result<PendingMutation, InfraError> {
        let settings = ThemeSettings {
            accent: normalize_accent(&settings.accent).map_err(InfraError::Validation)?,
            dark: settings.dark,
        };
        let previous = std::mem::replace(&mut self.snapshot.settings, settings.clone());
        self.write_cache(&settings);
        Ok(self.track(
            EntityKey::Settings,
            MutationKind::SaveSettings { settings, previous },
        ))
    }

    /// Folds a dispatch outcome back into the snapshot and returns it unchanged.
    pub fn reconcile(
        &mut self,
        pending: PendingMutation,
        result: Result<MutationOutcome, InfraError>,
    ) -> Result<MutationOutcome, InfraError> {
        // The ledger copy may have been rebased onto reloaded rows.
        let pending = self
            .in_flight
            .remove(&pending.correlation_id)
            .unwrap_or(pending);
        if pending.epoch != self.epoch {
            tracing::debug!(
                correlation_id = pending.correlation_id,
                "dropping outcome from a previous session"
            );
            return result;
        }
        let is_latest = self.versions.get(&pending.entity) == Some(&pending.sequence);

        match result {
            Ok(outcome) => {
                self.apply_success(&pending, &outcome);
                Ok(outcome)
            }
            Err(error) if is_latest => {
                tracing::warn!(
                    correlation_id = pending.correlation_id,
                    mutation = pending.name(),
                    "reverting optimistic change: {error}"
                );
                self.revert(pending);
                Err(error)
            }
            Err(error) => {
                tracing::warn!(
                    correlation_id = pending.correlation_id,
                    mutation = pending.name(),
                    "superseded change failed: {error}"
                );
                Err(error)
            }
        }
    }

    pub async fn add_task(&mut self, title: &str) -> Result<Task, InfraError> {
        let pending = self.begin_create_task(title)?;
        match self.run(pending).await? {
            MutationOutcome::TaskCreated(task) => Ok(task),
            other => Err(unexpected_outcome("task creation", &other)),
        }
    }

    pub async fn toggle_task(&mut self, id: i64) -> Result<(), InfraError> {
        let pending = self.begin_toggle_task(id)?;
        self.run(pending).await.map(|_| ())
    }

    pub async fn rename_task(&mut self, id: i64, title: &str) -> Result<(), InfraError> {
        let patch = TaskPatch {
            title: Some(title.to_string()),
            done: None,
        };
        let pending = self.begin_update_task(id, patch)?;
        self.run(pending).await.map(|_| ())
    }

    pub async fn remove_task(&mut self, id: i64) -> Result<(), InfraError> {
        let pending = self.begin_delete_task(id)?;
        self.run(pending).await.map(|_| ())
    }

    pub async fn add_event(&mut self, event: NewEvent) -> Result<Event, InfraError> {
        let pending = self.begin_create_event(event)?;
        match self.run(pending).await? {
            MutationOutcome::EventCreated(event) => Ok(event),
            other => Err(unexpected_outcome("event creation", &other)),
        }
    }

    pub async fn update_event(&mut self, id: i64, patch: EventPatch) -> Result<(), InfraError> {
        let pending = self.begin_update_event(id, patch)?;
        self.run(pending).await.map(|_| ())
    }

    pub async fn remove_event(&mut self, id: i64) -> Result<(), InfraError> {
        let pending = self.begin_delete_event(id)?;
        self.run(pending).await.map(|_| ())
    }

    pub async fn save_settings(&mut self, settings: ThemeSettings) -> Result<(), InfraError> {
        let pending = self.begin_save_settings(settings)?;
        self.run(pending).await.map(|_| ())
    }

    /// Events starting on `day` in the session's time zone.
    pub fn events_on(&self, day: NaiveDate) -> Vec<Event> {
        events_on_day(&self.snapshot.events, day, self.timezone)
    }

    pub fn events_today(&self) -> Vec<Event> {
        let today = (self.now_provider)().with_timezone(&self.timezone).date_naive();
        self.events_on(today)
    }

    pub fn metrics(&self) -> DashboardMetrics {
        compute_metrics(
            &self.snapshot.tasks,
            &self.snapshot.events,
            &self.timer,
            (self.now_provider)(),
        )
    }

    pub fn timer(&self) -> &TimerState {
        &self.timer
    }

    pub fn apply_timer(&mut self, event: TimerEvent) -> Result<&TimerState, TimerError> {
        let next = self.timer.transition(event)?;
        if self.timer.phase == TimerPhase::Running && next.phase == TimerPhase::Break {
            tracing::info!(
                completed_sessions = next.completed_sessions,
                "focus session completed"
            );
        }
        self.timer = next;
        Ok(&self.timer)
    }

    /// Drops everything tied to the signed-in user. Outcomes still in flight are
    /// ignored when they arrive.
    pub fn sign_out(&mut self) {
        self.snapshot.tasks.clear();
        self.snapshot.events.clear();
        self.snapshot.settings = ThemeSettings::default();
        self.versions.clear();
        self.in_flight.clear();
        self.epoch = self.epoch.wrapping_add(1);
        self.timer = self.timer.cleared();
        tracing::info!("signed out");
    }

    async fn run(&mut self, pending: PendingMutation) -> Result<MutationOutcome, InfraError> {
        let result = self.dispatcher.dispatch(&pending).await;
        self.reconcile(pending, result)
    }

    fn track(&mut self, entity: EntityKey, kind: MutationKind) -> PendingMutation {
        let correlation_id = self.next_correlation_id;
        self.next_correlation_id = self.next_correlation_id.wrapping_add(1);
        let sequence = self.versions.entry(entity).or_insert(0);
        *sequence += 1;
        let pending = PendingMutation {
            correlation_id,
            entity,
            sequence: *sequence,
            epoch: self.epoch,
            kind,
        };
        self.in_flight.insert(correlation_id, pending.clone());
        tracing::debug!(
            correlation_id,
            sequence = pending.sequence,
            mutation = pending.name(),
            "applied optimistic change"
        );
        pending
    }

    fn next_provisional_id(&mut self) -> i64 {
        let id = self.next_provisional_id;
        self.next_provisional_id -= 1;
        id
    }

    fn task_index(&self, id: i64) -> Result<usize, InfraError> {
        if id < 0 {
            return Err(InfraError::Validation(
                "task is still being created".to_string(),
            ));
        }
        self.snapshot
            .tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or_else(|| InfraError::Validation(format!("unknown task id {id}")))
    }

    fn event_index(&self, id: i64) -> Result<usize, InfraError> {
        if id < 0 {
            return Err(InfraError::Validation(
                "event is still being created".to_string(),
            ));
        }
        self.snapshot
            .events
            .iter()
            .position(|event| event.id == id)
            .ok_or_else(|| InfraError::Validation(format!("unknown event id {id}")))
    }

    fn write_cache(&self, settings: &ThemeSettings) {
        if let Err(error) = self.cache.save(settings) {
            tracing::warn!("failed to write settings cache: {error}");
        }
    }

    fn apply_success(&mut self, pending: &PendingMutation, outcome: &MutationOutcome) {
        match (&pending.kind, outcome) {
            (MutationKind::CreateTask { provisional_id, .. }, MutationOutcome::TaskCreated(task)) => {
                if let Some(slot) = self
                    .snapshot
                    .tasks
                    .iter_mut()
                    .find(|candidate| candidate.id == *provisional_id)
                {
                    *slot = task.clone();
                }
                self.versions.remove(&pending.entity);
            }
            (
                MutationKind::CreateEvent { provisional_id, .. },
                MutationOutcome::EventCreated(event),
            ) => {
                if let Some(slot) = self
                    .snapshot
                    .events
                    .iter_mut()
                    .find(|candidate| candidate.id == *provisional_id)
                {
                    *slot = event.clone();
                    sort_events(&mut self.snapshot.events);
                }
                self.versions.remove(&pending.entity);
            }
            // Acknowledgements carry no state; the snapshot already holds the
            // change or a newer one.
            _ => {}
        }
    }

    fn revert(&mut self, pending: PendingMutation) {
        match pending.kind {
            MutationKind::CreateTask { provisional_id, .. } => {
                self.snapshot.tasks.retain(|task| task.id != provisional_id);
            }
            MutationKind::UpdateTask { id, previous, .. } => {
                if let Some(slot) = self.snapshot.tasks.iter_mut().find(|task| task.id == id) {
                    *slot = previous;
                }
            }
            MutationKind::DeleteTask { previous } => {
                if self.snapshot.tasks.iter().any(|task| task.id == previous.id) {
                    return;
                }
                // Provisional rows lead the list; server rows follow by id descending.
                let index = self
                    .snapshot
                    .tasks
                    .iter()
                    .position(|task| task.id >= 0 && task.id < previous.id)
                    .unwrap_or(self.snapshot.tasks.len());
                self.snapshot.tasks.insert(index, previous);
            }
            MutationKind::CreateEvent { provisional_id, .. } => {
                self.snapshot.events.retain(|event| event.id != provisional_id);
            }
            MutationKind::UpdateEvent { id, previous, .. } => {
                if let Some(slot) = self.snapshot.events.iter_mut().find(|event| event.id == id) {
                    *slot = previous;
                }
                sort_events(&mut self.snapshot.events);
            }
            MutationKind::DeleteEvent { previous } => {
                if self.snapshot.events.iter().any(|event| event.id == previous.id) {
                    return;
                }
                self.snapshot.events.push(previous);
                sort_events(&mut self.snapshot.events);
            }
            MutationKind::SaveSettings { previous, .. } => {
                self.write_cache(&previous);
                self.snapshot.settings = previous;
            }
        }
    }

    /// Re-applies unanswered changes, oldest first, over the slices a load just
    /// replaced. Each replayed change is rebased so a later failure reverts to
    /// the reloaded row rather than the pre-load one.
    fn replay_in_flight(&mut self, tasks_loaded: bool, events_loaded: bool, settings_loaded: bool) {
        let epoch = self.epoch;
        let snapshot = &mut self.snapshot;
        for pending in self.in_flight.values_mut() {
            if pending.epoch != epoch {
                continue;
            }
            match &mut pending.kind {
                MutationKind::UpdateTask { id, patch, previous } if tasks_loaded => {
                    let Some(slot) = snapshot.tasks.iter_mut().find(|task| task.id == *id) else {
                        continue;
                    };
                    match patch.merge(&*slot) {
                        Ok(merged) => *previous = std::mem::replace(slot, merged),
                        Err(error) => tracing::warn!(
                            correlation_id = pending.correlation_id,
                            "cannot replay task update: {error}"
                        ),
                    }
                }
                MutationKind::DeleteTask { previous } if tasks_loaded => {
                    if let Some(index) = snapshot.tasks.iter().position(|task| task.id == previous.id) {
                        *previous = snapshot.tasks.remove(index);
                    }
                }
                MutationKind::UpdateEvent { id, patch, previous } if events_loaded => {
                    let Some(slot) = snapshot.events.iter_mut().find(|event| event.id == *id) else {
                        continue;
                    };
                    match patch.merge(&*slot) {
                        Ok(merged) => *previous = std::mem::replace(slot, merged),
                        Err(error) => tracing::warn!(
                            correlation_id = pending.correlation_id,
                            "cannot replay event update: {error}"
                        ),
                    }
                }
                MutationKind::DeleteEvent { previous } if events_loaded => {
                    if let Some(index) = snapshot.events.iter().position(|event| event.id == previous.id) {
                        *previous = snapshot.events.remove(index);
                    }
                }
                MutationKind::SaveSettings { settings, previous } if settings_loaded => {
                    *previous = std::mem::replace(&mut snapshot.settings, settings.clone());
                }
                _ => {}
            }
        }
        if events_loaded {
            sort_events(&mut snapshot.events);
        }
    }
}

fn sort_events(events: &mut [Event]) {
    events.sort_by_key(|event| (event.start, event.id));
}

fn unexpected_outcome(action: &str, outcome: &MutationOutcome) -> InfraError {
    InfraError::Http(format!("unexpected response to {action}: {outcome:?}"))
}
