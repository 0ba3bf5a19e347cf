//! Stress tests for synchub.
//!
//! These drivers hammer one server from several threads. Each thread acts
//! for its own user, so per-user logs stay in order while the shared
//! content store, id allocator and pending index are contended.

use crate::integration::{server_shape, Replica};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use synchub_core::{CoreResult, Outcome, ServerData};
use synchub_types::{ContentKey, DeviceId, FilePath, UserId};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Operations that were applied.
    pub successful_ops: usize,
    /// Operations rejected with a conflict.
    pub conflicts: usize,
    /// Operations that returned an error.
    pub failed_ops: usize,
    /// Users whose change feed did not replay to their tree.
    pub diverged_users: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, conflicts: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + conflicts + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            conflicts,
            failed_ops: failed,
            diverged_users: 0,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Applied: {}", self.successful_ops);
        println!("Conflicts: {}", self.conflicts);
        println!("Failed: {}", self.failed_ops);
        println!("Diverged users: {}", self.diverged_users);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads, one user each.
    pub threads: usize,
    /// Distinct contents each user writes.
    pub contents_per_user: usize,
    /// Seed for the per-thread generators.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 2_000,
            threads: 4,
            contents_per_user: 6,
            seed: 0x5eed,
        }
    }
}

const STRESS_PATHS: &[&str] = &["/a", "/b", "/c", "/d", "/d/a", "/d/b", "/e", "/e/a"];
const STRESS_DEVICES: &[&str] = &["laptop", "phone", "tablet"];

#[derive(Default)]
struct Tally {
    applied: AtomicUsize,
    conflicts: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn count<T>(&self, result: CoreResult<Outcome<T>>) {
        let counter = match result {
            Ok(Outcome::Applied(_)) => &self.applied,
            Ok(Outcome::Conflict(_)) => &self.conflicts,
            Err(err) => {
                tracing::error!(error = %err, "stress operation failed");
                &self.failed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn count_plain<T>(&self, result: CoreResult<T>) {
        self.count(result.map(Outcome::Applied));
    }
}

fn user_contents(user: &UserId, count: usize) -> Vec<Vec<u8>> {
    (0..count.max(1))
        .map(|i| format!("{user} content {i}").into_bytes())
        .collect()
}

fn stress_path(rng: &mut StdRng) -> FilePath {
    FilePath::parse(STRESS_PATHS[rng.gen_range(0..STRESS_PATHS.len())])
        .expect("Invalid stress path")
}

fn upload_pending(server: &ServerData, data: &[u8]) -> CoreResult<bool> {
    let Some(key) = server.storage().storage_key_for(&ContentKey::of_bytes(data))? else {
        return Ok(false);
    };
    if !server.storage().is_storage_key_pending(&key)? {
        return Ok(false);
    }
    server.upload_bytes(&key, data)
}

fn random_step(
    server: &ServerData,
    user: &UserId,
    contents: &[Vec<u8>],
    rng: &mut StdRng,
    tally: &Tally,
) {
    let device = DeviceId::new(STRESS_DEVICES[rng.gen_range(0..STRESS_DEVICES.len())]);
    let data = &contents[rng.gen_range(0..contents.len())];
    let content = ContentKey::of_bytes(data);

    match rng.gen_range(0..100) {
        0..=14 => tally.count(server.create_folder(user, &stress_path(rng))),
        15..=39 => tally.count(server.create_file(
            user,
            &device,
            &stress_path(rng),
            content.hash,
            content.size,
        )),
        40..=59 => {
            let path = stress_path(rng);
            let base = match server.get(user, &path) {
                Ok(Some(existing)) => existing.revision.unwrap_or_default(),
                Ok(None) => "0".repeat(32),
                Err(err) => return tally.count_plain::<()>(Err(err)),
            };
            tally.count(server.modify(user, &device, &path, &base, content.hash, content.size));
        }
        60..=69 => {
            let from = stress_path(rng);
            let to = stress_path(rng);
            tally.count(server.rename(user, &from, &to));
        }
        70..=76 => tally.count(server.delete(user, &stress_path(rng))),
        77..=94 => tally.count_plain(upload_pending(server, data)),
        95..=97 => tally.count_plain(server.device_disconnected(user, &device)),
        _ => tally.count_plain(server.changes_since(user, synchub_types::SyncId::ZERO)),
    }
}

/// Runs random scripts for `config.threads` users concurrently.
///
/// Every user writes contents no other user shares. Once the threads
/// finish, all missing contents are uploaded and each user's feed is
/// replayed from the start and compared with their tree.
pub fn stress_user_scripts(server: &ServerData, config: &StressConfig) -> StressTestResult {
    let tally = Tally::default();
    let users: Vec<UserId> = (0..config.threads)
        .map(|t| UserId::new(format!("user_{t}")))
        .collect();

    let start = Instant::now();
    thread::scope(|scope| {
        for (t, user) in users.iter().enumerate() {
            let tally = &tally;
            scope.spawn(move || {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                let contents = user_contents(user, config.contents_per_user);
                for _ in 0..config.operations {
                    random_step(server, user, &contents, &mut rng, tally);
                }
            });
        }
    });
    let duration = start.elapsed();

    let mut result = StressTestResult::new(
        tally.applied.load(Ordering::Relaxed),
        tally.conflicts.load(Ordering::Relaxed),
        tally.failed.load(Ordering::Relaxed),
        duration,
    );
    result.diverged_users = settle_and_compare(server, &users, config, &tally);
    result.failed_ops = tally.failed.load(Ordering::Relaxed);
    result
}

fn settle_and_compare(
    server: &ServerData,
    users: &[UserId],
    config: &StressConfig,
    tally: &Tally,
) -> usize {
    for user in users {
        for data in user_contents(user, config.contents_per_user) {
            if let Err(err) = upload_pending(server, &data) {
                tally.count_plain::<()>(Err(err));
            }
        }
    }

    users
        .iter()
        .filter(|user| {
            let mut replica = Replica::new();
            match replica.pull(server, user) {
                Ok(_) => replica.shape() != server_shape(server, user),
                Err(_) => true,
            }
        })
        .count()
}

/// Has `config.threads` users announce the same content concurrently.
///
/// Exactly one of them is asked to upload; it does so right away. Every
/// user must end up seeing the file. Returns the number of users told to
/// upload alongside the run result.
pub fn stress_shared_upload(server: &ServerData, config: &StressConfig) -> (StressTestResult, usize) {
    let tally = Tally::default();
    let uploaders = AtomicUsize::new(0);
    let data = b"content shared by every user".to_vec();
    let content = ContentKey::of_bytes(&data);
    let path = FilePath::parse("/shared.bin").expect("Invalid stress path");
    let users: Vec<UserId> = (0..config.threads)
        .map(|t| UserId::new(format!("sharer_{t}")))
        .collect();

    let start = Instant::now();
    thread::scope(|scope| {
        for user in &users {
            let (tally, uploaders, data, path) = (&tally, &uploaders, &data, &path);
            scope.spawn(move || {
                let device = DeviceId::new("laptop");
                match server.create_file(user, &device, path, content.hash, content.size) {
                    Ok(Outcome::Applied(stored)) => {
                        tally.applied.fetch_add(1, Ordering::Relaxed);
                        if let (true, Some(key)) = (stored.new_upload, stored.storage_key()) {
                            uploaders.fetch_add(1, Ordering::Relaxed);
                            tally.count_plain(server.upload_bytes(key, data));
                        }
                    }
                    other => tally.count(other),
                }
            });
        }
    });
    let duration = start.elapsed();

    let mut result = StressTestResult::new(
        tally.applied.load(Ordering::Relaxed),
        tally.conflicts.load(Ordering::Relaxed),
        tally.failed.load(Ordering::Relaxed),
        duration,
    );
    result.diverged_users = users
        .iter()
        .filter(|user| {
            let mut replica = Replica::new();
            !matches!(replica.pull(server, user), Ok(1))
                || replica.get(&path).and_then(|md| md.storage_key.as_ref())
                    != server.storage().storage_key_for(&content).ok().flatten().as_ref()
        })
        .count();
    (result, uploaders.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestServer;

    #[test]
    fn test_result_counts() {
        let result = StressTestResult::new(7, 2, 1, Duration::from_secs(1));
        assert_eq!(result.total_ops, 10);
        assert!((result.ops_per_second - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_small_user_scripts() {
        let server = TestServer::memory();
        let config = StressConfig {
            operations: 200,
            threads: 2,
            ..StressConfig::default()
        };
        let result = stress_user_scripts(&server, &config);
        assert_eq!(result.total_ops, 400);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.diverged_users, 0);
    }
}
