// Integration test utilities and fixture models for recast.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use recast_core::transaction::Transition;
use recast_core::{RecastConfig, Session, TransactionObserver, TransactionState};
use recast_model::{FrontEnd, ModelBuilder, ProgramModel, SnapshotFrontEnd, SymbolId, SymbolPath};

// ── Fixture models ───────────────────────────────────────────────

/// `billing::Order.price()`: `basePrice` is written once from
/// `quantity * itemPrice`; `discountFactor` is written in both branches of
/// an if/else.
pub fn pricing() -> ProgramModel {
    let mut b = ModelBuilder::new();
    let billing = b.module("billing");
    let order = b.ty(billing, "Order");
    let quantity = b.field(order, "quantity");
    let item_price = b.field(order, "itemPrice");
    let price = b.method(order, "price");
    let base = b.local(price, "basePrice");
    let discount = b.local(price, "discountFactor");

    let q = b.read(quantity);
    let p = b.read(item_price);
    let product = b.op("*", vec![q, p]);
    let set_base = b.assign(base, product);

    let read_base = b.read(base);
    let thousand = b.lit("1000");
    let test = b.op(">", vec![read_base, thousand]);
    let high = b.lit("0.95");
    let set_high = b.assign(discount, high);
    let low = b.lit("0.98");
    let set_low = b.assign(discount, low);
    let branch = b.cond(test, vec![set_high], Some(vec![set_low]));

    let read_base = b.read(base);
    let read_discount = b.read(discount);
    let total = b.op("*", vec![read_base, read_discount]);
    let ret = b.ret(Some(total));
    b.body(price, vec![set_base, branch, ret]);
    b.build().expect("pricing fixture is well-formed")
}

/// `geometry::Rect.report()` reuses `temp` for two unrelated values:
///
/// ```text
/// temp = 2 * (height + width); log(temp);
/// temp = height * width;       log(temp);
/// ```
pub fn rectangle() -> ProgramModel {
    let mut b = ModelBuilder::new();
    let geometry = b.module("geometry");
    let rect = b.ty(geometry, "Rect");
    let height = b.field(rect, "height");
    let width = b.field(rect, "width");
    let log = b.method(rect, "log");
    let _value = b.param(log, "value");
    b.body(log, vec![]);

    let report = b.method(rect, "report");
    let temp = b.local(report, "temp");

    let two = b.lit("2");
    let h = b.read(height);
    let w = b.read(width);
    let sum = b.op("+", vec![h, w]);
    let perimeter = b.op("*", vec![two, sum]);
    let first = b.assign(temp, perimeter);
    let read = b.read(temp);
    let log_first = b.call(log, vec![read]);

    let h = b.read(height);
    let w = b.read(width);
    let area = b.op("*", vec![h, w]);
    let second = b.assign(temp, area);
    let read = b.read(temp);
    let log_second = b.call(log, vec![read]);

    b.body(report, vec![first, log_first, second, log_second]);
    b.build().expect("rectangle fixture is well-formed")
}

/// `staff::Employee` with subtypes `Engineer` and `Salesman`, each
/// declaring a `name` field and a `describe()` that returns it.
pub fn staff() -> ProgramModel {
    let mut b = ModelBuilder::new();
    let staff = b.module("staff");
    let employee = b.ty(staff, "Employee");
    let id = b.field(employee, "id");
    let ident = b.method(employee, "ident");
    let read = b.read(id);
    let ret = b.ret(Some(read));
    b.body(ident, vec![ret]);

    for sub in ["Engineer", "Salesman"] {
        let ty = b.subtype(staff, sub, employee);
        let name = b.field(ty, "name");
        let describe = b.method(ty, "describe");
        let read = b.read(name);
        let ret = b.ret(Some(read));
        b.body(describe, vec![ret]);
    }
    b.build().expect("staff fixture is well-formed")
}

pub fn session(model: ProgramModel) -> Session {
    Session::builtin(model, RecastConfig::default()).expect("built-in registry loads")
}

pub fn path(text: &str) -> SymbolPath {
    text.parse().expect("valid symbol path")
}

pub fn resolve(model: &ProgramModel, text: &str) -> SymbolId {
    model.resolve(&path(text)).expect("path resolves")
}

/// Path of every symbol in the model, in declaration order.
pub fn symbol_paths(model: &ProgramModel) -> Vec<String> {
    model
        .to_snapshot()
        .symbols
        .iter()
        .filter_map(|s| model.path_of(s.id).ok())
        .map(|p| p.to_string())
        .collect()
}

// ── Snapshot files ───────────────────────────────────────────────

/// A model written as a JSON snapshot inside a temporary directory.
#[derive(Debug)]
pub struct SnapshotFile {
    pub dir: tempfile::TempDir,
    pub path: PathBuf,
}

impl SnapshotFile {
    pub fn write(model: &ProgramModel) -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("model.json");
        let text = SnapshotFrontEnd.render(model).expect("render snapshot");
        std::fs::write(&path, text).expect("write snapshot");
        Self { dir, path }
    }

    /// A path next to the snapshot, for outputs.
    pub fn sibling(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn load_snapshot(path: &Path) -> anyhow::Result<ProgramModel> {
    let text = std::fs::read_to_string(path)?;
    Ok(SnapshotFrontEnd.load_model(&text)?)
}

// ── Observers ────────────────────────────────────────────────────

/// Records every transition and the peak number of transactions that were
/// applying or verifying at the same time.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    transitions: Mutex<Vec<(String, TransactionState, TransactionState)>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingObserver {
    pub fn transitions(&self) -> Vec<(String, TransactionState, TransactionState)> {
        self.transitions.lock().expect("observer lock").clone()
    }

    pub fn peak_writers(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Terminal states reached, in order.
    pub fn outcomes(&self) -> Vec<TransactionState> {
        self.transitions()
            .into_iter()
            .map(|(_, _, to)| to)
            .filter(|s| matches!(s, TransactionState::Committed | TransactionState::RolledBack))
            .collect()
    }
}

impl TransactionObserver for RecordingObserver {
    fn on_transition(&self, transition: &Transition<'_>) {
        if transition.to == TransactionState::Applying {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        } else if transition.from.is_writing() && !transition.to.is_writing() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        self.transitions.lock().expect("observer lock").push((
            transition.recipe.to_string(),
            transition.from,
            transition.to,
        ));
    }
}
