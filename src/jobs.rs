//! Job Table (spec §3, §4.4): the shell's registry of background/stopped
//! pipelines, plus the `SIGCHLD`-driven reaping discipline that keeps it in
//! sync with the kernel.
//!
//! Grounded on the teacher's `jobs::JobTable` (id allocation, `jobs_sorted`,
//! `most_recent_id`/`most_recent_stopped_id` became `%+`/`%-` here) and the
//! Der7777 reference's `debug!("job event=...")` tracing style, but
//! reworked from synchronous `try_wait()` polling to true asynchronous
//! notification: the handler only sets a flag (the one async-signal-safe
//! thing it's allowed to do — no allocation, no locking), and the
//! synchronous side drains every pending child the moment it observes that
//! flag, rather than waiting for the next prompt redraw to poll.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::model::{Job, JobState};
use crate::process;
use crate::status::RawStatus;

static SIGCHLD_PENDING: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigchld(_sig: libc::c_int) {
    // Async-signal-safe: an atomic store and nothing else. Actual
    // `waitpid`/table mutation happens on the synchronous side once this
    // flag is observed (spec §4.4's "the handler only sets an atomic flag
    // or bumps a counter").
    SIGCHLD_PENDING.store(true, Ordering::SeqCst);
}

/// Install the `SIGCHLD` handler. `SA_RESTART` so a blocking read at the
/// prompt resumes instead of failing with `EINTR` on every child exit.
pub fn install_sigchld_handler() -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_sigchld as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = libc::SA_RESTART;
        if libc::sigaction(libc::SIGCHLD, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Consume the pending-reap flag. Safe to call speculatively (e.g. once per
/// prompt) even when nothing is pending.
pub fn take_pending_sigchld() -> bool {
    SIGCHLD_PENDING.swap(false, Ordering::SeqCst)
}

pub struct JobTable {
    jobs: HashMap<usize, Job>,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable { jobs: HashMap::new() }
    }

    pub fn insert(&mut self, mut job: Job) -> usize {
        // spec §8 "Job-id monotonicity within gaps": 1 + max(existing) if
        // any job is currently registered, else 1 — a freed high id (its
        // job was reaped and reported) is not held open forever.
        let id = self.jobs.keys().max().map_or(1, |max| max + 1);
        job.job_id = id;
        job.notify = false;
        log::debug!(
            "job event=register id={id} pgid={pgid} background={bg}",
            pgid = job.pgid,
            bg = job.background
        );
        self.jobs.insert(id, job);
        id
    }

    pub fn get(&self, id: usize) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    pub fn remove(&mut self, id: usize) -> Option<Job> {
        self.jobs.remove(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Job ids in ascending order, the order `jobs` lists them in.
    pub fn sorted_ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.jobs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// `%+`: the most recently stopped job if any, else the most recently
    /// touched still-running job (spec §3). Ranking is `(is_stopped,
    /// last_active)` so any Stopped job outranks every Running one
    /// regardless of recency, and ties among same-state jobs fall back to
    /// `last_active`.
    pub fn current_job(&self) -> Option<usize> {
        self.jobs
            .values()
            .filter(|j| j.state() != JobState::Done)
            .max_by_key(|j| (j.state() == JobState::Stopped, j.last_active))
            .map(|j| j.job_id)
    }

    /// `%-`: the next-ranked job by the same `(is_stopped, last_active)`
    /// ordering as `current_job`, excluding whichever job is current.
    pub fn previous_job(&self) -> Option<usize> {
        let current = self.current_job();
        self.jobs
            .values()
            .filter(|j| j.state() != JobState::Done && Some(j.job_id) != current)
            .max_by_key(|j| (j.state() == JobState::Stopped, j.last_active))
            .map(|j| j.job_id)
    }

    /// Resolve a `jobs`/`fg`/`bg`/`kill` jobspec: `%N`, bare `N`, `%%`/`%+`
    /// (current job), `%-` (previous job), or `%prefix` matching the start
    /// of a job's display string (spec §4.2's "unambiguous prefix match").
    pub fn resolve_jobspec(&self, spec: &str) -> Result<usize, String> {
        let body = spec.strip_prefix('%').unwrap_or(spec);
        match body {
            "" | "%" | "+" => {
                self.current_job().ok_or_else(|| "current: no such job".to_string())
            }
            "-" => self.previous_job().ok_or_else(|| "previous: no such job".to_string()),
            _ => {
                if let Ok(id) = body.parse::<usize>() {
                    return self
                        .jobs
                        .contains_key(&id)
                        .then_some(id)
                        .ok_or_else(|| format!("{spec}: no such job"));
                }
                let matches: Vec<usize> = self
                    .jobs
                    .values()
                    .filter(|j| j.display_string.starts_with(body))
                    .map(|j| j.job_id)
                    .collect();
                match matches.as_slice() {
                    [id] => Ok(*id),
                    [] => Err(format!("{spec}: no such job")),
                    _ => Err(format!("{spec}: ambiguous job spec")),
                }
            }
        }
    }

    fn job_owning_pid_mut(&mut self, pid: libc::pid_t) -> Option<&mut Job> {
        self.jobs.values_mut().find(|j| j.commands.iter().any(|c| c.pid == pid))
    }

    /// Drain every `waitpid`-reportable event currently available
    /// (non-blocking), applying each to its owning job. Returns the ids of
    /// jobs that became notify-worthy (fully Done or fully Stopped) as a
    /// result, in the order observed — used to print the
    /// `[n]+ Done  cmd` lines spec §4.4 describes.
    pub fn reap_available(&mut self) -> Vec<usize> {
        let _guard = process::SignalBlockGuard::block(libc::SIGCHLD);
        let mut notify = Vec::new();
        loop {
            match process::try_wait_any() {
                Ok(Some((pid, status))) => {
                    if let Some(job) = self.job_owning_pid_mut(pid) {
                        log::debug!(
                            "job event=reap pid={pid} id={id} status={status:?}",
                            id = job.job_id
                        );
                        if job.apply_status(pid, status) {
                            notify.push(job.job_id);
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    log::warn!("job event=reap-error error={err}");
                    break;
                }
            }
        }
        notify
    }

    /// Apply one already-observed status directly (the foreground
    /// synchronous wait path in the executor, which calls
    /// `process::wait_pid_blocking` itself rather than going through the
    /// non-blocking reaper). Shares `Job::apply_status` with
    /// `reap_available` so both paths agree (spec §4.4).
    pub fn apply_status(&mut self, pid: libc::pid_t, status: RawStatus) -> Option<usize> {
        let job = self.job_owning_pid_mut(pid)?;
        let notify_worthy = job.apply_status(pid, status);
        notify_worthy.then_some(job.job_id)
    }

    /// Block until `job_id`'s group reports no further event (the job is
    /// fully reaped) or becomes fully stopped — the synchronous half of
    /// spec §4.3's foreground-wait contract, shared by the executor's own
    /// foreground path and the `fg`/`wait` builtins so both agree with the
    /// async reaper via the same `Job::apply_status` state machine.
    pub fn wait_foreground(&mut self, job_id: usize) -> JobState {
        loop {
            let Some(pgid) = self.get(job_id).map(|j| j.pgid) else {
                return JobState::Done;
            };
            match process::wait_group_blocking(pgid) {
                Ok(Some((pid, status))) => {
                    if let Some(job) = self.job_owning_pid_mut(pid) {
                        log::debug!(
                            "job event=wait pid={pid} id={id} status={status:?}",
                            id = job.job_id
                        );
                        job.apply_status(pid, status);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    log::warn!("job event=wait-error error={err}");
                    break;
                }
            }
            if self.get(job_id).map(Job::state) != Some(JobState::Running) {
                break;
            }
        }
        self.get(job_id).map(Job::state).unwrap_or(JobState::Done)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Command;

    fn job(display: &str) -> Job {
        Job::new(vec![Command::new(display.to_string())], true, display.to_string())
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let mut table = JobTable::new();
        let a = table.insert(job("sleep 1"));
        let b = table.insert(job("sleep 2"));
        assert!(b > a);
        assert_eq!(table.sorted_ids(), vec![a, b]);
    }

    #[test]
    fn removing_the_highest_job_frees_its_id() {
        // spec §8: "new job ids are 1 + max(existing) if any, else 1".
        let mut table = JobTable::new();
        let a = table.insert(job("sleep 1"));
        let b = table.insert(job("sleep 2"));
        table.remove(b);
        let c = table.insert(job("sleep 3"));
        assert_eq!(c, b, "freeing the highest id should let it be reissued");
        assert_eq!(table.sorted_ids(), vec![a, c]);
    }

    #[test]
    fn resolve_jobspec_by_number_and_percent() {
        let mut table = JobTable::new();
        let id = table.insert(job("sleep 1"));
        assert_eq!(table.resolve_jobspec(&format!("%{id}")).unwrap(), id);
        assert_eq!(table.resolve_jobspec(&id.to_string()).unwrap(), id);
        assert!(table.resolve_jobspec("%99").is_err());
    }

    #[test]
    fn resolve_jobspec_by_prefix() {
        let mut table = JobTable::new();
        let id = table.insert(job("sleep 100"));
        assert_eq!(table.resolve_jobspec("%sleep").unwrap(), id);
    }

    #[test]
    fn ambiguous_prefix_is_an_error() {
        let mut table = JobTable::new();
        table.insert(job("sleep 1"));
        table.insert(job("sleep 2"));
        assert!(table.resolve_jobspec("%sleep").is_err());
    }

    #[test]
    fn current_and_previous_job_track_recency() {
        let mut table = JobTable::new();
        let a = table.insert(job("a"));
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = table.insert(job("b"));
        assert_eq!(table.current_job(), Some(b));
        assert_eq!(table.previous_job(), Some(a));
    }

    #[test]
    fn stopped_job_outranks_a_more_recent_running_one() {
        // spec §3: %+ is "the most recently stopped job if any, else the
        // most recent backgrounded alive job" — recency alone must not let
        // a Running job beat an older Stopped one.
        let mut table = JobTable::new();
        let a = table.insert(job("a"));
        {
            let job = table.get_mut(a).unwrap();
            job.unreaped_count = 1;
            job.stopped_count = 1;
        }
        assert_eq!(table.get(a).unwrap().state(), JobState::Stopped);

        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = table.insert(job("b"));
        table.get_mut(b).unwrap().unreaped_count = 1;

        assert_eq!(table.current_job(), Some(a));
    }
}
