//! Scripted fakes and fixtures shared by unit tests

use crate::bridge::Crew;
use crate::chart::{Chart, MonitoredApp, Region, RegionRegistry};
use crate::clock::ManualClock;
use crate::courier::{Courier, Inbox};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::platform::{AccessToken, AppAction, Platform, ProcessSummary};
use crate::sickbay::probe::{Fetch, Page};
use crate::sickbay::HealthProber;
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted probe reply
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    Body(u16, &'static str),
    /// Never answers; only the caller's timeout ends the attempt
    Hang,
    /// Connection-level failure
    Fail,
}

/// Probe transport answering from per-URL scripts
///
/// Replies are consumed in order; the last one repeats. Unscripted URLs
/// answer 200.
#[derive(Default)]
pub struct FakeFetch {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn next_reply(&self, url: &str) -> Reply {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::Status(200)),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Status(200)),
            None => Reply::Status(200),
        }
    }
}

#[async_trait]
impl Fetch for FakeFetch {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<Page> {
        match self.next_reply(url) {
            Reply::Status(status) => Ok(Page {
                status,
                body: String::new(),
            }),
            Reply::Body(status, body) => Ok(Page {
                status,
                body: body.to_string(),
            }),
            Reply::Hang => std::future::pending().await,
            Reply::Fail => Err(Error::Transport(format!("{}: connection refused", url))),
        }
    }
}

#[derive(Default)]
struct PlatformScript {
    app_states: VecDeque<String>,
    fallback_state: Option<String>,
    fallback_instances: Option<Vec<String>>,
    fail_auth: bool,
    missing: HashSet<String>,
    calls: Vec<String>,
}

/// Control plane answering from a script and recording every call
///
/// By default apps start immediately and have one RUNNING web instance.
#[derive(Default)]
pub struct FakePlatform {
    script: Mutex<PlatformScript>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// App states returned before falling back
    pub fn script_app_states(&self, states: Vec<&str>) {
        self.script.lock().unwrap().app_states = states.into_iter().map(String::from).collect();
    }

    pub fn set_fallback_state(&self, state: &str) {
        self.script.lock().unwrap().fallback_state = Some(state.to_string());
    }

    pub fn set_fallback_instances(&self, states: Vec<&str>) {
        self.script.lock().unwrap().fallback_instances =
            Some(states.into_iter().map(String::from).collect());
    }

    pub fn fail_auth(&self) {
        self.script.lock().unwrap().fail_auth = true;
    }

    pub fn missing(&self, app: &str) {
        self.script.lock().unwrap().missing.insert(app.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.script.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn authenticate(&self, region: &Region) -> Result<AccessToken> {
        self.record(format!("auth:{}", region.code));
        if self.script.lock().unwrap().fail_auth {
            return Err(Error::Auth {
                status: 401,
                body: "Bad credentials".into(),
            });
        }
        Ok(AccessToken::new("fake-token"))
    }

    async fn find_app(&self, region: &Region, _token: &AccessToken, name: &str) -> Result<String> {
        self.record(format!("find:{}:{}", region.code, name));
        if self.script.lock().unwrap().missing.contains(name) {
            return Err(Error::AppNotFound(name.to_string()));
        }
        Ok(format!("guid-{}", name))
    }

    async fn app_action(
        &self,
        _region: &Region,
        _token: &AccessToken,
        guid: &str,
        action: AppAction,
    ) -> Result<()> {
        self.record(format!("{}:{}", action.as_str(), guid));
        Ok(())
    }

    async fn app_state(&self, _region: &Region, _token: &AccessToken, guid: &str) -> Result<String> {
        self.record(format!("state:{}", guid));
        let mut script = self.script.lock().unwrap();
        let state = script.app_states.pop_front().unwrap_or_else(|| {
            script
                .fallback_state
                .clone()
                .unwrap_or_else(|| "STARTED".to_string())
        });
        Ok(state)
    }

    async fn processes(
        &self,
        _region: &Region,
        _token: &AccessToken,
        guid: &str,
    ) -> Result<Vec<ProcessSummary>> {
        self.record(format!("processes:{}", guid));
        Ok(vec![
            ProcessSummary {
                guid: "p-worker".into(),
                kind: "worker".into(),
            },
            ProcessSummary {
                guid: "p-web".into(),
                kind: "web".into(),
            },
        ])
    }

    async fn instance_states(
        &self,
        _region: &Region,
        _token: &AccessToken,
        process_guid: &str,
    ) -> Result<Vec<String>> {
        self.record(format!("stats:{}", process_guid));
        let script = self.script.lock().unwrap();
        Ok(script
            .fallback_instances
            .clone()
            .unwrap_or_else(|| vec!["RUNNING".to_string()]))
    }
}

fn region(code: &str, name: &str, host: &str, pattern: &str) -> Region {
    Region {
        code: code.to_string(),
        name: name.to_string(),
        api: format!("https://api.cf.{}", host),
        uaa: format!("https://uaa.cf.{}", host),
        pattern: Regex::new(pattern).unwrap(),
    }
}

fn catalog(name: &str) -> MonitoredApp {
    let (url, region) = match name {
        "s1" => ("https://s1.cfapps.ap21.hana.ondemand.com", "AP"),
        "us0" => ("https://us0.cfapps.us10-001.hana.ondemand.com", "US"),
        "us1" => ("https://us1.cfapps.us10-001.hana.ondemand.com", "US"),
        other => panic!("no fixture app named {}", other),
    };
    MonitoredApp {
        name: name.to_string(),
        url: url.to_string(),
        region: region.to_string(),
    }
}

/// Two regions (US, AP) with the named fixture apps
pub fn chart_with(names: &[&str]) -> Chart {
    let registry = RegionRegistry::new(vec![
        region(
            "US",
            "US East",
            "us10-001.hana.ondemand.com",
            r"\.us10(-001)?\.hana\.ondemand\.com$",
        ),
        region(
            "AP",
            "Singapore",
            "ap21.hana.ondemand.com",
            r"\.ap21\.hana\.ondemand\.com$",
        ),
    ]);
    Chart::new(registry, names.iter().map(|n| catalog(n)).collect())
}

/// Fleet of `s1` (AP) and `us0` (US)
pub fn chart() -> Chart {
    chart_with(&["s1", "us0"])
}

/// A fully wired crew over fakes
pub struct Rig {
    pub crew: Crew,
    pub ledger: Ledger,
    pub clock: Arc<ManualClock>,
    pub fetch: Arc<FakeFetch>,
    pub platform: Arc<FakePlatform>,
    pub inbox: Inbox,
}

impl Rig {
    pub fn app(&self, name: &str) -> MonitoredApp {
        self.crew
            .chart
            .apps()
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .unwrap_or_else(|| catalog(name))
    }
}

pub fn rig_with(names: Vec<&str>) -> Rig {
    let clock = Arc::new(ManualClock::new());
    let ledger = Ledger::open_in_memory(clock.clone()).unwrap();
    let (courier, inbox) = Courier::detached(clock.clone());
    let fetch = Arc::new(FakeFetch::new());
    let platform = Arc::new(FakePlatform::new());
    let crew = Crew::new(
        ledger.clone(),
        courier,
        clock.clone(),
        Arc::new(chart_with(&names)),
        platform.clone(),
        HealthProber::new(fetch.clone()),
    );
    Rig {
        crew,
        ledger,
        clock,
        fetch,
        platform,
        inbox,
    }
}

pub fn rig() -> Rig {
    rig_with(vec!["s1", "us0"])
}
