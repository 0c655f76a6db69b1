//! Wizard state machine: four ordered steps, a validity flag each, one active step.

use std::fmt;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WizardStep {
    PlantAssignment,
    ContainerSelection,
    ProposalCreation,
    Processing,
}

impl WizardStep {
    pub const ALL: [WizardStep; 4] = [
        WizardStep::PlantAssignment,
        WizardStep::ContainerSelection,
        WizardStep::ProposalCreation,
        WizardStep::Processing,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WizardStep::PlantAssignment => "plant assignment",
            WizardStep::ContainerSelection => "container selection",
            WizardStep::ProposalCreation => "proposal creation",
            WizardStep::Processing => "processing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepValidity {
    #[default]
    Invalid,
    Valid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepController {
    validity: [StepValidity; 4],
    active: usize,
}

impl StepController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> WizardStep {
        WizardStep::ALL[self.active]
    }

    pub fn is_valid(&self, step: WizardStep) -> bool {
        self.validity[step.index()] == StepValidity::Valid
    }

    pub fn validity(&self, step: WizardStep) -> StepValidity {
        self.validity[step.index()]
    }

    /// Marks `step` valid. Refused while any earlier step is invalid.
    pub fn validate(&mut self, step: WizardStep) -> bool {
        if let Some(blocker) = WizardStep::ALL[..step.index()]
            .iter()
            .find(|earlier| !self.is_valid(**earlier))
        {
            debug!(%step, %blocker, "steps: validation refused, earlier step invalid");
            return false;
        }
        self.validity[step.index()] = StepValidity::Valid;
        true
    }

    /// Validates every step from the first through `last`, stopping at the first refusal.
    pub fn validate_through(&mut self, last: WizardStep) -> bool {
        WizardStep::ALL[..=last.index()]
            .iter()
            .all(|step| self.validate(*step))
    }

    /// Invalidates only `step`; later steps keep their flag.
    pub fn invalidate(&mut self, step: WizardStep) {
        self.validity[step.index()] = StepValidity::Invalid;
    }

    /// Invalidates `step` and every later step, pulling the active step back to `step`.
    pub fn discard_from(&mut self, step: WizardStep) {
        for validity in &mut self.validity[step.index()..] {
            *validity = StepValidity::Invalid;
        }
        self.active = self.active.min(step.index());
    }

    /// Backward navigation always succeeds. Forward navigation requires the current step and
    /// every step passed over to be valid.
    pub fn go_to(&mut self, step: WizardStep) -> bool {
        let target = step.index();
        if target > self.active {
            if let Some(blocker) = WizardStep::ALL[self.active..target]
                .iter()
                .find(|passed| !self.is_valid(**passed))
            {
                debug!(%step, %blocker, "steps: forward navigation refused");
                return false;
            }
        }
        self.active = target;
        true
    }

    pub fn go_to_index(&mut self, index: usize) -> bool {
        match WizardStep::from_index(index) {
            Some(step) => self.go_to(step),
            None => {
                warn!(index, "steps: navigation target out of range; ignoring");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/steps_tests.rs"]
mod tests;
