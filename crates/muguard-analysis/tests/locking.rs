//! Intra-function locking diagnostics over handcrafted IR: double locks,
//! RWMutex mode misuse, embedded mutexes, interface dispatch, unlock of
//! unheld, and lock leaks.

use muguard_analysis::config::Config;
use muguard_analysis::MutexAnalyzer;
use muguard_diagnostics::diagnostic::Diagnostic;
use muguard_ir::builder::{FuncBuilder, PackageBuilder};
use muguard_ir::ir::{FieldDef, Package};

const LOCK: &str = "(*sync.Mutex).Lock";
const UNLOCK: &str = "(*sync.Mutex).Unlock";
const RW_LOCK: &str = "(*sync.RWMutex).Lock";
const RW_UNLOCK: &str = "(*sync.RWMutex).Unlock";
const RW_RLOCK: &str = "(*sync.RWMutex).RLock";
const RW_RUNLOCK: &str = "(*sync.RWMutex).RUnlock";

fn analyze(pkg: Package) -> Vec<Diagnostic> {
    let config = Config::default();
    MutexAnalyzer::analyze_package(&pkg, &config, None)
}

fn rules_of(diags: &[Diagnostic]) -> Vec<&str> {
    diags.iter().map(|d| d.rule.as_str()).collect()
}

#[test]
fn double_lock_is_reported() {
    let mut pkg = PackageBuilder::new("example.com/p", "p");
    let (_, counter_ptr) =
        pkg.struct_type("example.com/p.Counter", &[("mu", "sync.Mutex"), ("count", "int")]);

    let mut f = FuncBuilder::new("(*example.com/p.Counter).Twice", "d.go", 10).method();
    let recv = f.param(counter_ptr);
    let mu = f.field_addr(recv, 0, 11);
    f.call(LOCK, &[mu], 11);
    f.call(LOCK, &[mu], 12);
    f.call(UNLOCK, &[mu], 13);
    f.ret(14);
    pkg.func(f.build());

    let diags = analyze(pkg.build());
    assert_eq!(rules_of(&diags), vec!["MU003"], "diags: {diags:#?}");
    assert_eq!(
        diags[0].message,
        "Counter.mu is already held when locking Counter.mu"
    );
    assert_eq!(diags[0].location.line, 12);
}

#[test]
fn recursive_rlock_and_upgrade() {
    let mut pkg = PackageBuilder::new("example.com/p", "p");
    let (_, rw_ptr) =
        pkg.struct_type("example.com/p.RW", &[("rw", "sync.RWMutex"), ("data", "int")]);

    let mut rec = FuncBuilder::new("(*example.com/p.RW).ReadTwice", "rw.go", 10).method();
    let recv = rec.param(rw_ptr);
    let rw = rec.field_addr(recv, 0, 11);
    rec.call(RW_RLOCK, &[rw], 11);
    rec.call(RW_RLOCK, &[rw], 12);
    rec.call(RW_RUNLOCK, &[rw], 13);
    rec.ret(14);
    pkg.func(rec.build());

    let mut up = FuncBuilder::new("(*example.com/p.RW).Upgrade", "rw.go", 20).method();
    let recv = up.param(rw_ptr);
    let rw = up.field_addr(recv, 0, 21);
    up.call(RW_RLOCK, &[rw], 21);
    up.call(RW_LOCK, &[rw], 22);
    up.call(RW_UNLOCK, &[rw], 23);
    up.ret(24);
    pkg.func(up.build());

    let diags = analyze(pkg.build());
    assert_eq!(rules_of(&diags), vec!["MU004", "MU005"], "diags: {diags:#?}");
    assert_eq!(
        diags[0].message,
        "recursive RLock on RW.rw — can deadlock if a writer is waiting"
    );
    assert_eq!(
        diags[1].message,
        "RW.rw.Lock() called while RW.rw is read-locked — lock upgrade can deadlock"
    );
}

#[test]
fn mismatched_unlock_mode() {
    let mut pkg = PackageBuilder::new("example.com/p", "p");
    let (_, rw_ptr) =
        pkg.struct_type("example.com/p.RW", &[("rw", "sync.RWMutex"), ("data", "int")]);

    let mut f = FuncBuilder::new("(*example.com/p.RW).Sloppy", "rw.go", 10).method();
    let recv = f.param(rw_ptr);
    let rw = f.field_addr(recv, 0, 11);
    f.call(RW_LOCK, &[rw], 11);
    f.call(RW_RUNLOCK, &[rw], 12);
    f.ret(13);
    pkg.func(f.build());

    let diags = analyze(pkg.build());
    assert_eq!(rules_of(&diags), vec!["MU006"], "diags: {diags:#?}");
    assert_eq!(
        diags[0].message,
        "RW.rw is exclusively locked but RUnlock() was called — use Unlock()"
    );
}

#[test]
fn write_under_read_lock() {
    let mut pkg = PackageBuilder::new("example.com/p", "p");
    let (_, rw_ptr) =
        pkg.struct_type("example.com/p.RW", &[("rw", "sync.RWMutex"), ("data", "int")]);

    let mut writer = FuncBuilder::new("(*example.com/p.RW).Put", "rw.go", 10).method();
    let recv = writer.param(rw_ptr);
    let rw = writer.field_addr(recv, 0, 11);
    writer.call(RW_LOCK, &[rw], 11);
    let data = writer.field_addr(recv, 1, 12);
    let v = writer.value(12);
    writer.store(data, v, 12);
    writer.call(RW_UNLOCK, &[rw], 13);
    writer.ret(14);
    pkg.func(writer.build());

    let mut bad = FuncBuilder::new("(*example.com/p.RW).BadPut", "rw.go", 30).method();
    let recv = bad.param(rw_ptr);
    let rw = bad.field_addr(recv, 0, 31);
    bad.call(RW_RLOCK, &[rw], 31);
    let data = bad.field_addr(recv, 1, 32);
    let v = bad.value(32);
    bad.store(data, v, 32);
    bad.call(RW_RUNLOCK, &[rw], 33);
    bad.ret(34);
    pkg.func(bad.build());

    let diags = analyze(pkg.build());
    assert_eq!(rules_of(&diags), vec!["MU002"], "diags: {diags:#?}");
    assert_eq!(
        diags[0].message,
        "field RW.data is written while RW.rw is read-locked — use Lock() for write access"
    );
    assert_eq!(diags[0].location.line, 32);
}

#[test]
fn embedded_mutex_receiver() {
    let mut pkg = PackageBuilder::new("example.com/p", "p");
    let (_, emb_ptr) = pkg.struct_type_full(
        "example.com/p.Emb",
        vec![
            FieldDef {
                name: "RWMutex".into(),
                type_name: "sync.RWMutex".into(),
                embedded: true,
                span: None,
            },
            FieldDef {
                name: "data".into(),
                type_name: "int".into(),
                ..Default::default()
            },
        ],
    );

    // Promoted lock methods: the receiver is *Emb, not *sync.RWMutex.
    let mut set = FuncBuilder::new("(*example.com/p.Emb).Set", "e.go", 10).method();
    let recv = set.param(emb_ptr);
    set.call("(*example.com/p.Emb).Lock", &[recv], 11);
    let data = set.field_addr(recv, 1, 12);
    let v = set.value(12);
    set.store(data, v, 12);
    set.call("(*example.com/p.Emb).Unlock", &[recv], 13);
    set.ret(14);
    pkg.func(set.build());

    let mut get = FuncBuilder::new("(*example.com/p.Emb).Get", "e.go", 20).method();
    let recv = get.param(emb_ptr);
    let data = get.field_addr(recv, 1, 21);
    get.load(data, 21);
    get.ret(22);
    pkg.func(get.build());

    let diags = analyze(pkg.build());
    assert_eq!(rules_of(&diags), vec!["MU001"], "diags: {diags:#?}");
    assert_eq!(
        diags[0].message,
        "field Emb.data is accessed without holding Emb.RWMutex"
    );
}

#[test]
fn interface_dispatch_is_opaque_for_propagation() {
    let mut pkg = PackageBuilder::new("example.com/p", "p");
    let (_, counter_ptr) =
        pkg.struct_type("example.com/p.Counter", &[("mu", "sync.Mutex"), ("count", "int")]);

    // helper writes the guarded field without the lock.
    let mut helper = FuncBuilder::new("(*example.com/p.Counter).helper", "i.go", 10).method();
    let recv = helper.param(counter_ptr);
    let count = helper.field_addr(recv, 1, 11);
    let v = helper.value(11);
    helper.store(count, v, 11);
    helper.ret(12);
    pkg.func(helper.build());

    // Inc establishes the guard.
    let mut inc = FuncBuilder::new("(*example.com/p.Counter).Inc", "i.go", 20).method();
    let recv = inc.param(counter_ptr);
    let mu = inc.field_addr(recv, 0, 21);
    inc.call(LOCK, &[mu], 21);
    let count = inc.field_addr(recv, 1, 22);
    let v = inc.value(22);
    inc.store(count, v, 22);
    inc.call(UNLOCK, &[mu], 23);
    inc.ret(24);
    pkg.func(inc.build());

    // The only call to helper goes through an interface: no call site is
    // recorded, so helper keeps its direct diagnostic instead of a
    // call-site one.
    let mut caller = FuncBuilder::new("example.com/p.Caller", "i.go", 30);
    let c = caller.param(counter_ptr);
    caller.call_iface("(example.com/p.Mutator).helper", &[c], 31);
    caller.ret(32);
    pkg.func(caller.build());

    let diags = analyze(pkg.build());
    assert_eq!(rules_of(&diags), vec!["MU001"], "diags: {diags:#?}");
    assert_eq!(diags[0].location.line, 11, "reported at helper's write");
}

#[test]
fn interface_dispatched_lock_on_mutex_receiver_is_tracked() {
    let mut pkg = PackageBuilder::new("example.com/p", "p");
    let (_, counter_ptr) =
        pkg.struct_type("example.com/p.Counter", &[("mu", "sync.Mutex"), ("count", "int")]);

    // mu is passed around as a sync.Locker; the receiver still resolves
    // to the mutex field, so the access below is seen as guarded.
    let mut f = FuncBuilder::new("(*example.com/p.Counter).Inc", "i.go", 10).method();
    let recv = f.param(counter_ptr);
    let mu = f.field_addr(recv, 0, 11);
    f.call_iface("(sync.Locker).Lock", &[mu], 11);
    let count = f.field_addr(recv, 1, 12);
    let v = f.value(12);
    f.store(count, v, 12);
    f.call_iface("(sync.Locker).Unlock", &[mu], 13);
    f.ret(14);
    pkg.func(f.build());

    let diags = analyze(pkg.build());
    assert!(diags.is_empty(), "diags: {diags:#?}");
}

#[test]
fn unlock_of_unheld_mutex() {
    let mut pkg = PackageBuilder::new("example.com/p", "p");
    let (_, counter_ptr) =
        pkg.struct_type("example.com/p.Counter", &[("mu", "sync.Mutex"), ("count", "int")]);

    let mut f = FuncBuilder::new("(*example.com/p.Counter).Oops", "u.go", 10).method();
    let recv = f.param(counter_ptr);
    let mu = f.field_addr(recv, 0, 11);
    f.call(UNLOCK, &[mu], 11);
    f.ret(12);
    pkg.func(f.build());

    let diags = analyze(pkg.build());
    assert_eq!(rules_of(&diags), vec!["MU010"], "diags: {diags:#?}");
    assert_eq!(
        diags[0].message,
        "Unlock() called but Counter.mu is not held"
    );
}

#[test]
fn unlock_of_unheld_suppressed_for_required_lock() {
    let mut pkg = PackageBuilder::new("example.com/p", "p");
    let (_, counter_ptr) =
        pkg.struct_type("example.com/p.Counter", &[("mu", "sync.Mutex"), ("count", "int")]);

    // Inc establishes the guard.
    let mut inc = FuncBuilder::new("(*example.com/p.Counter).Inc", "u.go", 10).method();
    let recv = inc.param(counter_ptr);
    let mu = inc.field_addr(recv, 0, 11);
    inc.call(LOCK, &[mu], 11);
    let count = inc.field_addr(recv, 1, 12);
    let v = inc.value(12);
    inc.store(count, v, 12);
    inc.call(UNLOCK, &[mu], 13);
    inc.ret(14);
    pkg.func(inc.build());

    // A helper written to run with mu held: it touches the guarded field
    // and releases the lock on behalf of its caller. The requirement
    // explains the bare unlock.
    let mut helper = FuncBuilder::new("(*example.com/p.Counter).finish", "u.go", 20).method();
    let recv = helper.param(counter_ptr);
    let count = helper.field_addr(recv, 1, 21);
    let v = helper.value(21);
    helper.store(count, v, 21);
    let mu = helper.field_addr(recv, 0, 22);
    helper.call(UNLOCK, &[mu], 22);
    helper.ret(23);
    pkg.func(helper.build());

    // A caller that locks and delegates the unlock.
    let mut caller = FuncBuilder::new("(*example.com/p.Counter).Finish", "u.go", 30).method();
    let recv = caller.param(counter_ptr);
    let mu = caller.field_addr(recv, 0, 31);
    caller.call(LOCK, &[mu], 31);
    caller.call("(*example.com/p.Counter).finish", &[recv], 32);
    caller.ret(33);
    pkg.func(caller.build());

    let diags = analyze(pkg.build());
    assert!(
        !rules_of(&diags).contains(&"MU010"),
        "requirement must explain the unlock: {diags:#?}"
    );
}

#[test]
fn lock_leak_on_one_return_path() {
    let mut pkg = PackageBuilder::new("example.com/p", "p");
    let (_, counter_ptr) =
        pkg.struct_type("example.com/p.Counter", &[("mu", "sync.Mutex"), ("count", "int")]);

    let mut f = FuncBuilder::new("(*example.com/p.Counter).Leaky", "l.go", 10).method();
    let recv = f.param(counter_ptr);
    let mu = f.field_addr(recv, 0, 11);
    f.call(LOCK, &[mu], 11);
    let early = f.new_block();
    f.select_block(early);
    f.ret(14);
    let rest = f.new_block();
    f.select_block(rest);
    f.call(UNLOCK, &[mu], 16);
    f.ret(17);
    f.edge(0, early).edge(0, rest);
    pkg.func(f.build());

    let diags = analyze(pkg.build());
    assert_eq!(rules_of(&diags), vec!["MU011"], "diags: {diags:#?}");
    assert_eq!(
        diags[0].message,
        "return without unlocking Counter.mu (locked at l.go:11:2)"
    );
    assert_eq!(diags[0].location.line, 14);
}
