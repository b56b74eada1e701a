// userJob, asyncUserJob and partitionUserJob
//
// All three save 400 users, level up the ones whose order total qualifies and,
// when `date=YYYY-MM` is given, write that month's daily order totals as CSV.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use batch_engine::{
    AsyncItemProcessor, AsyncItemWriter, BatchError, BatchResult, Chunk, ExecutionContext,
    FnItemProcessor, ItemReader, ItemWriter, Job, JobExecution, JobExecutionListener,
    JobParameters, JobParametersDecider, KeyRange, KeyRangeSource, Partition, RangePartitioner,
    RepeatStatus, RunIdIncrementer, Step, StepScope, Tasklet,
};
use chrono::{Datelike, Local, NaiveDate};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use super::JobEnv;
use crate::io::CsvItemWriter;

const USERS_PER_TIER: usize = 100;
const GRID_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Vip,
    Gold,
    Silver,
    Normal,
}

impl Level {
    /// Order total needed to leave this level
    fn next_amount(self) -> u64 {
        match self {
            Self::Vip | Self::Gold => 500_000,
            Self::Silver => 300_000,
            Self::Normal => 200_000,
        }
    }

    fn next_level(self) -> Option<Level> {
        match self {
            Self::Vip => None,
            Self::Gold => Some(Self::Vip),
            Self::Silver => Some(Self::Gold),
            Self::Normal => Some(Self::Silver),
        }
    }

    pub fn available_level_up(self, total_amount: u64) -> bool {
        self.next_level().is_some() && total_amount >= self.next_amount()
    }

    /// Level a user with this order total belongs to
    pub fn for_total(total_amount: u64) -> Level {
        if total_amount >= Self::Vip.next_amount() {
            Self::Vip
        } else if total_amount >= Self::Silver.next_amount() {
            Self::Gold
        } else if total_amount >= Self::Normal.next_amount() {
            Self::Silver
        } else {
            Self::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub item_name: String,
    pub amount: u64,
    pub created_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Assigned by the store; 0 until saved
    pub id: u64,
    pub username: String,
    pub level: Level,
    pub orders: Vec<Order>,
    pub updated_date: Option<NaiveDate>,
}

impl User {
    pub fn new(username: impl Into<String>, orders: Vec<Order>) -> Self {
        Self {
            id: 0,
            username: username.into(),
            level: Level::Normal,
            orders,
            updated_date: None,
        }
    }

    pub fn total_amount(&self) -> u64 {
        self.orders.iter().map(|o| o.amount).sum()
    }

    pub fn available_level_up(&self) -> bool {
        self.level.available_level_up(self.total_amount())
    }

    pub fn level_up(&mut self, today: NaiveDate) -> Level {
        self.level = Level::for_total(self.total_amount());
        self.updated_date = Some(today);
        self.level
    }
}

/// One row of the monthly order report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderStatistics {
    pub total_amount: u64,
    pub date: NaiveDate,
}

#[derive(Debug, Default)]
struct UserTable {
    next_id: u64,
    rows: BTreeMap<u64, User>,
}

/// In-process user table keyed by id
#[derive(Debug, Clone, Default)]
pub struct UserStore {
    table: Arc<Mutex<UserTable>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; users without an id get the next one
    pub async fn save_all(&self, users: Vec<User>) {
        let mut table = self.table.lock().await;
        for mut user in users {
            if user.id == 0 {
                table.next_id += 1;
                user.id = table.next_id;
            }
            table.rows.insert(user.id, user);
        }
    }

    /// Users in id order, optionally limited to a key range
    pub async fn find_all(&self, range: Option<KeyRange>) -> Vec<User> {
        self.table
            .lock()
            .await
            .rows
            .values()
            .filter(|u| range.map_or(true, |r| r.contains(u.id as i64)))
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.table.lock().await.rows.len()
    }

    pub async fn count_updated_on(&self, date: NaiveDate) -> usize {
        self.table
            .lock()
            .await
            .rows
            .values()
            .filter(|u| u.updated_date == Some(date))
            .count()
    }

    /// Sum of order amounts per day within `[start, end]`, ascending by day
    pub async fn order_statistics(&self, start: NaiveDate, end: NaiveDate) -> Vec<OrderStatistics> {
        let mut totals: BTreeMap<NaiveDate, u64> = BTreeMap::new();
        for order in self
            .table
            .lock()
            .await
            .rows
            .values()
            .flat_map(|u| u.orders.iter())
            .filter(|o| o.created_date >= start && o.created_date <= end)
        {
            *totals.entry(order.created_date).or_default() += order.amount;
        }

        totals
            .into_iter()
            .map(|(date, total_amount)| OrderStatistics { total_amount, date })
            .collect()
    }
}

#[async_trait]
impl KeyRangeSource for UserStore {
    async fn key_range(&self) -> BatchResult<Option<KeyRange>> {
        let table = self.table.lock().await;
        let first = table.rows.keys().next();
        let last = table.rows.keys().next_back();
        Ok(match (first, last) {
            (Some(&min), Some(&max)) => Some(KeyRange::new(min as i64, max as i64)),
            _ => None,
        })
    }
}

fn sample_users() -> Vec<User> {
    let tiers = [
        (1_000, NaiveDate::from_ymd_opt(2020, 11, 1)),
        (200_000, NaiveDate::from_ymd_opt(2020, 11, 2)),
        (300_000, NaiveDate::from_ymd_opt(2020, 11, 3)),
        (500_000, NaiveDate::from_ymd_opt(2020, 11, 4)),
    ];

    tiers
        .into_iter()
        .filter_map(|(amount, date)| date.map(|date| (amount, date)))
        .flat_map(|(amount, created_date)| {
            (0..USERS_PER_TIER).map(move |i| {
                User::new(
                    format!("test username{}", i),
                    vec![Order {
                        item_name: format!("item{}", i),
                        amount,
                        created_date,
                    }],
                )
            })
        })
        .collect()
}

struct SaveUserTasklet {
    store: UserStore,
}

#[async_trait]
impl Tasklet for SaveUserTasklet {
    async fn execute(&self, scope: &mut StepScope<'_>) -> BatchResult<RepeatStatus> {
        let users = sample_users();
        scope.step_execution.write_count += users.len() as u64;
        self.store.save_all(users).await;
        Ok(RepeatStatus::Finished)
    }
}

/// Reads a snapshot of the store (or one id range of it) taken at the first read
struct UserReader {
    store: UserStore,
    range: Option<KeyRange>,
    pending: Option<VecDeque<User>>,
    skip: usize,
    read_count: usize,
}

impl UserReader {
    fn new(store: UserStore, range: Option<KeyRange>) -> Self {
        Self {
            store,
            range,
            pending: None,
            skip: 0,
            read_count: 0,
        }
    }
}

const USER_READ_COUNT: &str = "userItemReader.read.count";

#[async_trait]
impl ItemReader<User> for UserReader {
    async fn open(&mut self, context: &ExecutionContext) -> BatchResult<()> {
        self.skip = context.get_long_or(USER_READ_COUNT, 0).max(0) as usize;
        self.read_count = self.skip;
        self.pending = None;
        Ok(())
    }

    async fn read(&mut self) -> BatchResult<Option<User>> {
        if self.pending.is_none() {
            let users = self.store.find_all(self.range).await;
            self.pending = Some(users.into_iter().skip(self.skip).collect());
        }

        let next = self.pending.as_mut().and_then(VecDeque::pop_front);
        if next.is_some() {
            self.read_count += 1;
        }
        Ok(next)
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> BatchResult<()> {
        context.put_long(USER_READ_COUNT, self.read_count as i64);
        Ok(())
    }
}

fn level_up_candidate(user: User) -> BatchResult<Option<User>> {
    Ok(user.available_level_up().then_some(user))
}

struct LevelUpWriter {
    store: UserStore,
}

#[async_trait]
impl ItemWriter<User> for LevelUpWriter {
    async fn write(&mut self, chunk: &mut Chunk<User>) -> BatchResult<()> {
        let today = Local::now().date_naive();
        let updated: Vec<User> = chunk
            .iter()
            .cloned()
            .map(|mut user| {
                user.level_up(today);
                user
            })
            .collect();
        self.store.save_all(updated).await;
        Ok(())
    }
}

/// Logs how many users were updated today and how long the job took
pub struct LevelUpJobExecutionListener {
    store: UserStore,
}

#[async_trait]
impl JobExecutionListener for LevelUpJobExecutionListener {
    async fn after_job(&self, job_execution: &JobExecution) -> BatchResult<()> {
        let updated = self.store.count_updated_on(Local::now().date_naive()).await;
        let elapsed_ms = job_execution.duration().map_or(0, |d| d.as_millis() as u64);
        info!(
            job = %job_execution.job_name,
            updated,
            elapsed_ms,
            "user level-up finished"
        );
        Ok(())
    }
}

/// First and last day of a `YYYY-MM` month
fn month_bounds(text: &str) -> BatchResult<(NaiveDate, NaiveDate)> {
    let invalid = || BatchError::InvalidParameter(format!("date '{}' is not YYYY-MM", text));
    let first = NaiveDate::parse_from_str(&format!("{}-01", text.trim()), "%Y-%m-%d")
        .map_err(|_| invalid())?;
    let next_month = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    let last = next_month.and_then(|d| d.pred_opt()).ok_or_else(invalid)?;
    Ok((first, last))
}

/// Hands out the report rows computed at the first read
struct OrderStatisticsReader {
    store: UserStore,
    start: NaiveDate,
    end: NaiveDate,
    pending: Option<VecDeque<OrderStatistics>>,
}

#[async_trait]
impl ItemReader<OrderStatistics> for OrderStatisticsReader {
    async fn read(&mut self) -> BatchResult<Option<OrderStatistics>> {
        if self.pending.is_none() {
            let rows = self.store.order_statistics(self.start, self.end).await;
            self.pending = Some(rows.into());
        }
        Ok(self.pending.as_mut().and_then(VecDeque::pop_front))
    }
}

fn order_statistics_step(
    store: UserStore,
    output_dir: PathBuf,
    chunk_size: usize,
) -> impl Fn(&JobParameters) -> BatchResult<Step> + Send + Sync + 'static {
    move |parameters: &JobParameters| {
        let date = parameters
            .get_string("date")
            .ok_or_else(|| BatchError::InvalidParameter("missing 'date'".to_string()))?;
        let (start, end) = month_bounds(&date)?;
        let path = output_dir.join(format!(
            "{}_{}_daily_order_amount.csv",
            start.year(),
            start.month()
        ));

        Step::builder("orderStatisticsStep")
            .chunk::<OrderStatistics>(chunk_size)
            .reader(OrderStatisticsReader {
                store: store.clone(),
                start,
                end,
                pending: None,
            })
            .writer(CsvItemWriter::new(
                "orderStatisticsItemWriter",
                path,
                "total_amount, date",
            ))
            .build()
    }
}

/// save -> level up -> (date present) order statistics
fn level_up_job(name: &str, env: &JobEnv, level_up: Step, chunk_size: usize) -> BatchResult<Job> {
    let save = Step::builder("saveUserStep").tasklet(SaveUserTasklet {
        store: env.users.clone(),
    });

    Job::builder(name)
        .incrementer(RunIdIncrementer::new())
        .listener(LevelUpJobExecutionListener {
            store: env.users.clone(),
        })
        .start(save)
        .next(level_up)
        .decision("dateDecider", JobParametersDecider::new("date"))
        .on("CONTINUE")
        .next_job_scoped(
            "orderStatisticsStep",
            order_statistics_step(env.users.clone(), env.output_dir.clone(), chunk_size),
        )
        .build()
}

pub fn user_job(env: &JobEnv) -> BatchResult<Job> {
    const CHUNK_SIZE: usize = 100;

    let level_up = Step::builder("userLevelUpStep")
        .chunk::<User>(CHUNK_SIZE)
        .reader(UserReader::new(env.users.clone(), None))
        .processor(FnItemProcessor::new(level_up_candidate))
        .writer(LevelUpWriter {
            store: env.users.clone(),
        })
        .build()?;

    level_up_job("userJob", env, level_up, CHUNK_SIZE)
}

pub fn async_user_job(env: &JobEnv) -> BatchResult<Job> {
    const CHUNK_SIZE: usize = 1000;

    let level_up = Step::builder("userLevelUpStep")
        .chunk::<User>(CHUNK_SIZE)
        .reader(UserReader::new(env.users.clone(), None))
        .processor(AsyncItemProcessor::new(
            FnItemProcessor::new(level_up_candidate),
            env.config.async_pool_size,
        ))
        .writer(AsyncItemWriter::new(LevelUpWriter {
            store: env.users.clone(),
        }))
        .build()?;

    level_up_job("asyncUserJob", env, level_up, CHUNK_SIZE)
}

pub fn partition_user_job(env: &JobEnv) -> BatchResult<Job> {
    const CHUNK_SIZE: usize = 1000;

    let store = env.users.clone();
    let level_up = Step::builder("userLevelUpStep.manager")
        .partitioner(RangePartitioner::new(env.users.clone()), GRID_SIZE)
        .worker(move |partition: &Partition| {
            let range = KeyRange::from_context(&partition.context)?;
            Step::builder("userLevelUpStep")
                .chunk::<User>(CHUNK_SIZE)
                .reader(UserReader::new(store.clone(), Some(range)))
                .processor(FnItemProcessor::new(level_up_candidate))
                .writer(LevelUpWriter {
                    store: store.clone(),
                })
                .build()
        })
        .build()?;

    level_up_job("partitionUserJob", env, level_up, CHUNK_SIZE)
}
