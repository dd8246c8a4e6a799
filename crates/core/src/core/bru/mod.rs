//! Branch prediction modules.
//!
//! Two contracts live here: the direction predictor and the branch target
//! buffer. Multiple modules may be configured per role; every outcome
//! notification broadcasts to all of them, and the prediction of the last
//! configured module wins.

pub mod bimodal;
pub mod btb;

use crate::common::addr::Address;
use crate::common::BranchType;
use crate::config::{BranchPredictorKind, BtbKind};

pub use self::bimodal::BimodalPredictor;
pub use self::btb::BasicBtb;

/// Branch direction predictor contract.
pub trait BranchPredictor {
    /// Called once before simulation begins.
    fn initialize(&mut self) {}

    /// Predicts whether the branch at `ip` is taken.
    fn predict(&mut self, ip: Address) -> bool;

    /// Observes a resolved branch.
    fn last_branch_result(&mut self, ip: Address, target: Address, taken: bool, ty: BranchType);
}

/// Branch target buffer contract.
pub trait Btb {
    /// Called once before simulation begins.
    fn initialize(&mut self) {}

    /// Predicts the target and taken-ness of the branch at `ip`.
    fn predict(&mut self, ip: Address) -> (Address, bool);

    /// Observes a resolved branch.
    fn update(&mut self, ip: Address, target: Address, taken: bool, ty: BranchType);
}

/// Ordered collection of direction predictors.
pub struct BranchModuleSet {
    modules: Vec<Box<dyn BranchPredictor>>,
}

impl BranchModuleSet {
    /// Builds the configured predictor chain.
    pub fn build(kinds: &[BranchPredictorKind]) -> Self {
        let modules = kinds
            .iter()
            .map(|kind| -> Box<dyn BranchPredictor> {
                match kind {
                    BranchPredictorKind::Bimodal => Box::new(BimodalPredictor::new()),
                }
            })
            .collect();
        Self { modules }
    }

    /// Initializes every module.
    pub fn initialize(&mut self) {
        for module in &mut self.modules {
            module.initialize();
        }
    }

    /// Queries every module; the last one's answer wins.
    pub fn predict(&mut self, ip: Address) -> bool {
        let mut taken = true;
        for module in &mut self.modules {
            taken = module.predict(ip);
        }
        taken
    }

    /// Broadcasts a resolved branch.
    pub fn last_branch_result(&mut self, ip: Address, target: Address, taken: bool, ty: BranchType) {
        for module in &mut self.modules {
            module.last_branch_result(ip, target, taken, ty);
        }
    }
}

/// Ordered collection of target predictors.
pub struct BtbSet {
    modules: Vec<Box<dyn Btb>>,
}

impl BtbSet {
    /// Builds the configured BTB chain.
    pub fn build(kinds: &[BtbKind]) -> Self {
        let modules = kinds
            .iter()
            .map(|kind| -> Box<dyn Btb> {
                match kind {
                    BtbKind::Basic => Box::new(BasicBtb::new()),
                }
            })
            .collect();
        Self { modules }
    }

    /// Initializes every module.
    pub fn initialize(&mut self) {
        for module in &mut self.modules {
            module.initialize();
        }
    }

    /// Queries every module; the last one's answer wins.
    pub fn predict(&mut self, ip: Address) -> (Address, bool) {
        let mut prediction = (Address::new(0), false);
        for module in &mut self.modules {
            prediction = module.predict(ip);
        }
        prediction
    }

    /// Broadcasts a resolved branch.
    pub fn update(&mut self, ip: Address, target: Address, taken: bool, ty: BranchType) {
        for module in &mut self.modules {
            module.update(ip, target, taken, ty);
        }
    }
}
