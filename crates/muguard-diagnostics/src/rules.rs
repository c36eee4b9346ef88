//! Rule catalog — all MuGuard analysis rules.
//!
//! This module is the single source of truth for rule metadata; the CLI's
//! `explain` command renders from here.

use serde::Serialize;

/// Information about a single analysis rule.
#[derive(Debug, Clone, Serialize)]
pub struct RuleInfo {
    pub code: String,
    pub name: String,
    pub description: String,
    pub severity: String,
    /// Example Go code that triggers this rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_bad: Option<String>,
    /// Example Go code that is safe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_good: Option<String>,
}

/// Look up a single rule by code (e.g., "MU001").
pub fn get_rule(code: &str) -> Option<RuleInfo> {
    get_all_rules().into_iter().find(|r| r.code == code)
}

/// Return all available analysis rules.
pub fn get_all_rules() -> Vec<RuleInfo> {
    vec![
        RuleInfo {
            code: "MU001".into(),
            name: "Inconsistent field locking".into(),
            description:
                "A struct field that is normally protected by a mutex is accessed without holding it."
                    .into(),
            severity: "warning".into(),
            example_bad: Some(
                "func (c *Counter) Get() int {\n    return c.count // count is guarded by c.mu elsewhere\n}".into(),
            ),
            example_good: Some(
                "func (c *Counter) Get() int {\n    c.mu.Lock()\n    defer c.mu.Unlock()\n    return c.count\n}".into(),
            ),
        },
        RuleInfo {
            code: "MU002".into(),
            name: "Write under read lock".into(),
            description:
                "A guarded field is written while its RWMutex is only read-locked; RLock does not exclude other readers or writers.".into(),
            severity: "error".into(),
            example_bad: Some("c.mu.RLock()\nc.count++\nc.mu.RUnlock()".into()),
            example_good: Some("c.mu.Lock()\nc.count++\nc.mu.Unlock()".into()),
        },
        RuleInfo {
            code: "MU003".into(),
            name: "Double lock".into(),
            description: "A mutex is acquired while the same mutex is already held; sync.Mutex is not reentrant.".into(),
            severity: "error".into(),
            example_bad: Some("c.mu.Lock()\nc.mu.Lock() // deadlocks".into()),
            example_good: None,
        },
        RuleInfo {
            code: "MU004".into(),
            name: "Recursive read lock".into(),
            description:
                "RLock is taken while the same RWMutex is already read-locked on the path; deadlocks if a writer is queued between the two."
                    .into(),
            severity: "warning".into(),
            example_bad: Some("c.mu.RLock()\nc.mu.RLock()".into()),
            example_good: None,
        },
        RuleInfo {
            code: "MU005".into(),
            name: "Lock upgrade".into(),
            description: "Lock is called while the same RWMutex is read-locked; upgrades are not supported and deadlock.".into(),
            severity: "error".into(),
            example_bad: Some("c.mu.RLock()\nc.mu.Lock() // deadlock".into()),
            example_good: Some("c.mu.RUnlock()\nc.mu.Lock()".into()),
        },
        RuleInfo {
            code: "MU006".into(),
            name: "Mismatched unlock".into(),
            description: "The unlock method does not match the mode the lock was acquired in (Unlock after RLock, or RUnlock after Lock).".into(),
            severity: "error".into(),
            example_bad: Some("c.mu.RLock()\ndefer c.mu.Unlock()".into()),
            example_good: Some("c.mu.RLock()\ndefer c.mu.RUnlock()".into()),
        },
        RuleInfo {
            code: "MU007".into(),
            name: "Interprocedural double lock".into(),
            description: "The caller holds a mutex that the callee (or one of its transitive callees) also acquires.".into(),
            severity: "error".into(),
            example_bad: Some("c.mu.Lock()\nc.Inc() // Inc locks c.mu itself".into()),
            example_good: None,
        },
        RuleInfo {
            code: "MU008".into(),
            name: "Missing lock at call site".into(),
            description: "The callee accesses guarded fields assuming a mutex is held, but the caller does not hold it.".into(),
            severity: "warning".into(),
            example_bad: Some("// helper writes c.count without locking\nc.helper()".into()),
            example_good: Some("c.mu.Lock()\nc.helper()\nc.mu.Unlock()".into()),
        },
        RuleInfo {
            code: "MU009".into(),
            name: "Lock ordering cycle".into(),
            description: "Two or more mutexes are acquired in conflicting orders on different paths; concurrent execution can deadlock.".into(),
            severity: "error".into(),
            example_bad: Some(
                "// goroutine 1: a.mu then b.mu\n// goroutine 2: b.mu then a.mu".into(),
            ),
            example_good: Some("// acquire a.mu before b.mu everywhere".into()),
        },
        RuleInfo {
            code: "MU010".into(),
            name: "Unlock of unheld mutex".into(),
            description: "Unlock is called on a mutex that is not held on this path; this panics at runtime.".into(),
            severity: "error".into(),
            example_bad: Some("c.mu.Unlock() // never locked".into()),
            example_good: None,
        },
        RuleInfo {
            code: "MU011".into(),
            name: "Lock leak".into(),
            description: "A function returns while holding a mutex with no deferred unlock; every later Lock blocks forever.".into(),
            severity: "error".into(),
            example_bad: Some("c.mu.Lock()\nif err != nil {\n    return err // mu still held\n}".into()),
            example_good: Some("c.mu.Lock()\ndefer c.mu.Unlock()".into()),
        },
        RuleInfo {
            code: "MU012".into(),
            name: "Inconsistent branch lock state".into(),
            description: "At a branch merge, a mutex is held on one incoming path but not the other.".into(),
            severity: "warning".into(),
            example_bad: Some("if cond {\n    c.mu.Lock()\n}\nc.count++ // locked only sometimes".into()),
            example_good: None,
        },
        RuleInfo {
            code: "MU013".into(),
            name: "Deferred lock typo".into(),
            description: "A lock acquisition is deferred where a release was almost certainly intended; the deferred Lock deadlocks at return.".into(),
            severity: "error".into(),
            example_bad: Some("c.mu.Lock()\ndefer c.mu.Lock() // meant Unlock".into()),
            example_good: Some("c.mu.Lock()\ndefer c.mu.Unlock()".into()),
        },
        RuleInfo {
            code: "MU014".into(),
            name: "Returns while holding".into(),
            description: "A function returns with a mutex held on every path; callers must release it. Reported at the function so the contract is visible.".into(),
            severity: "info".into(),
            example_bad: Some("func (r *Registry) lockAndGet() *T {\n    r.mu.Lock()\n    return r.item\n}".into()),
            example_good: None,
        },
        RuleInfo {
            code: "MU015".into(),
            name: "Caller never releases".into(),
            description: "A caller of a returns-while-holding helper neither releases the acquired mutex nor propagates the obligation.".into(),
            severity: "error".into(),
            example_bad: Some("v := r.lockAndGet()\nuse(v) // r.mu never unlocked".into()),
            example_good: Some("v := r.lockAndGet()\ndefer r.mu.Unlock()".into()),
        },
        RuleInfo {
            code: "MU016".into(),
            name: "Exported guarded field".into(),
            description: "A field inferred to be mutex-guarded is exported; external packages can bypass the lock.".into(),
            severity: "info".into(),
            example_bad: Some("type Registry struct {\n    mu    sync.Mutex\n    Items map[string]int // guarded but exported\n}".into()),
            example_good: Some("type Registry struct {\n    mu    sync.Mutex\n    items map[string]int\n}".into()),
        },
    ]
}
