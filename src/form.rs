//! Multi-section form state machine.
//!
//! One machine serves both layouts the product uses: independent sections
//! the user switches between freely, and a linear wizard whose forward steps
//! are gated on the current step being valid.

use std::collections::HashMap;
use std::sync::Arc;

use time::{Date, OffsetDateTime};

use crate::authority::{CardData, Flow, FormData, Payload};
use crate::error::Error;
use crate::types::{Field, SectionId};
use crate::validation::{
    self, BrandPolicy, CardBrand, FieldError, ValidationResult, normalize_card_number,
};

/// Predicate deciding whether the user may move past a section.
pub type ForwardGate = Arc<dyn Fn(&FormStateMachine) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavigationMode {
    /// Any section may be opened at any time.
    #[default]
    Free,
    /// Forward moves go one step at a time through the forward gate.
    Sequential,
}

/// One step of the form.
#[derive(Clone)]
pub struct SectionSpec {
    id: SectionId,
    fields: Vec<Field>,
    flow: Option<Flow>,
    forward_gate: Option<ForwardGate>,
}

impl std::fmt::Debug for SectionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionSpec")
            .field("id", &self.id)
            .field("fields", &self.fields)
            .field("flow", &self.flow)
            .field("forward_gate", &self.forward_gate.is_some())
            .finish()
    }
}

impl SectionSpec {
    #[must_use]
    pub fn new(id: impl Into<SectionId>) -> Self {
        Self {
            id: id.into(),
            fields: Vec::new(),
            flow: None,
            forward_gate: None,
        }
    }

    /// Fields edited in this section.
    #[must_use]
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields = fields.into_iter().collect();
        self
    }

    /// Makes the section submittable through `flow`.
    #[must_use]
    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Overrides the default gate (all of this section's fields valid).
    #[must_use]
    pub fn with_forward_gate(
        mut self,
        gate: impl Fn(&FormStateMachine) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.forward_gate = Some(Arc::new(gate));
        self
    }

    #[must_use]
    pub fn id(&self) -> &SectionId {
        &self.id
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn flow(&self) -> Option<Flow> {
        self.flow
    }
}

/// Declares the sections of a form and how they are navigated.
#[derive(Debug, Clone, Default)]
pub struct FormConfig {
    sections: Vec<SectionSpec>,
    mode: NavigationMode,
    brand_policy: BrandPolicy,
}

impl FormConfig {
    #[must_use]
    pub fn new(mode: NavigationMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_section(mut self, section: SectionSpec) -> Self {
        self.sections.push(section);
        self
    }

    #[must_use]
    pub fn with_brand_policy(mut self, policy: BrandPolicy) -> Self {
        self.brand_policy = policy;
        self
    }

    /// Gift card management page: check balance, register card and
    /// personalize PIN as independent sections. 16-digit cards, 3-digit CVV.
    #[must_use]
    pub fn gift_card() -> Self {
        Self::new(NavigationMode::Free)
            .with_brand_policy(BrandPolicy::Ignore)
            .with_section(
                SectionSpec::new("check")
                    .with_fields(Field::CARD)
                    .with_flow(Flow::CheckBalance),
            )
            .with_section(
                SectionSpec::new("register")
                    .with_fields(Field::CARD)
                    .with_flow(Flow::RegisterCard),
            )
            .with_section(
                SectionSpec::new("personalize")
                    .with_fields(Field::CARD.into_iter().chain(Field::PIN))
                    .with_flow(Flow::PersonalizePin),
            )
    }

    /// Three-step redemption wizard: card number, expiry and CVV, review.
    #[must_use]
    pub fn redemption_wizard() -> Self {
        Self::new(NavigationMode::Sequential)
            .with_brand_policy(BrandPolicy::Detect)
            .with_section(SectionSpec::new("card").with_fields([Field::CardNumber]))
            .with_section(SectionSpec::new("details").with_fields([
                Field::ExpiryMonth,
                Field::ExpiryYear,
                Field::Cvv,
            ]))
            .with_section(SectionSpec::new("review").with_flow(Flow::Redeem))
    }

    #[must_use]
    pub fn sections(&self) -> &[SectionSpec] {
        &self.sections
    }

    #[must_use]
    pub fn mode(&self) -> NavigationMode {
        self.mode
    }

    #[must_use]
    pub fn brand_policy(&self) -> BrandPolicy {
        self.brand_policy
    }
}

/// What the form is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Index into the configured sections.
    Section(usize),
    /// Submission succeeded.
    Success,
    /// The session was revoked.
    Denied,
}

impl View {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Denied)
    }
}

fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

pub struct FormStateMachine {
    config: FormConfig,
    view: View,
    values: HashMap<Field, String>,
    clock: fn() -> Date,
}

impl std::fmt::Debug for FormStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Field values stay out of logs.
        f.debug_struct("FormStateMachine")
            .field("view", &self.view)
            .field("fields_filled", &self.values.len())
            .finish_non_exhaustive()
    }
}

impl FormStateMachine {
    /// Opens the form on its first section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` declares no sections or repeats
    /// a section id.
    pub fn new(config: FormConfig) -> Result<Self, Error> {
        if config.sections.is_empty() {
            return Err(Error::Config("form needs at least one section".into()));
        }
        for (i, section) in config.sections.iter().enumerate() {
            if config.sections[..i].iter().any(|s| s.id == section.id) {
                return Err(Error::Config(format!("duplicate section id: {}", section.id)));
            }
        }
        Ok(Self {
            config,
            view: View::Section(0),
            values: HashMap::new(),
            clock: today_utc,
        })
    }

    /// Replaces the source of "today" used by the expiry check.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> Date) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    #[must_use]
    pub fn view(&self) -> View {
        self.view
    }

    #[must_use]
    pub fn today(&self) -> Date {
        (self.clock)()
    }

    /// The active section, or `None` in a terminal view.
    #[must_use]
    pub fn current_section(&self) -> Option<&SectionSpec> {
        match self.view {
            View::Section(i) => self.config.sections.get(i),
            View::Success | View::Denied => None,
        }
    }

    /// Raw value of `field` as entered (empty if never set).
    #[must_use]
    pub fn value(&self, field: Field) -> &str {
        self.values.get(&field).map_or("", String::as_str)
    }

    /// Stores a raw value and returns its validation result.
    pub fn set_field(&mut self, field: Field, value: impl Into<String>) -> ValidationResult {
        self.values.insert(field, value.into());
        self.validate_field(field)
    }

    /// Brand governing length checks, recomputed from the current card number.
    #[must_use]
    pub fn card_brand(&self) -> CardBrand {
        self.config.brand_policy.brand_for(self.value(Field::CardNumber))
    }

    pub fn validate_field(&self, field: Field) -> ValidationResult {
        let brand = self.card_brand();
        match field {
            Field::CardNumber => validation::validate_card_number(self.value(field), brand),
            Field::ExpiryMonth | Field::ExpiryYear => validation::validate_expiry(
                self.value(Field::ExpiryMonth),
                self.value(Field::ExpiryYear),
                self.today(),
            ),
            Field::Cvv => validation::validate_cvv(self.value(field), brand),
            Field::NewPin => validation::validate_new_pin(self.value(field)),
            Field::ConfirmPin => validation::validate_pin_confirmation(
                self.value(Field::NewPin),
                self.value(Field::ConfirmPin),
            ),
        }
    }

    /// Every failing field among `fields`.
    pub fn errors_in(&self, fields: &[Field]) -> Vec<(Field, FieldError)> {
        fields
            .iter()
            .filter_map(|&f| self.validate_field(f).err().map(|e| (f, e)))
            .collect()
    }

    /// Failing fields that block submitting the active section.
    #[must_use]
    pub fn section_errors(&self) -> Vec<(Field, FieldError)> {
        match self.current_section() {
            Some(section) => match section.flow {
                Some(flow) => self.errors_in(flow.required_fields()),
                None => self.errors_in(&section.fields),
            },
            None => Vec::new(),
        }
    }

    /// Flow the active section submits to, if it is submittable.
    #[must_use]
    pub fn submission_flow(&self) -> Option<Flow> {
        self.current_section().and_then(SectionSpec::flow)
    }

    #[must_use]
    pub fn can_submit(&self) -> bool {
        self.submission_flow()
            .is_some_and(|flow| self.errors_in(flow.required_fields()).is_empty())
    }

    fn forward_gate_passes(&self, section: &SectionSpec) -> bool {
        match &section.forward_gate {
            Some(gate) => gate(self),
            None => self.errors_in(&section.fields).is_empty(),
        }
    }

    /// Moves to `target`. Returns `false`, leaving the state unchanged, when
    /// the move is not allowed.
    pub fn navigate(&mut self, target: &SectionId) -> bool {
        let View::Section(current) = self.view else {
            return false;
        };
        let Some(target_idx) = self.config.sections.iter().position(|s| &s.id == target) else {
            return false;
        };

        let allowed = target_idx <= current
            || match self.config.mode {
                NavigationMode::Free => true,
                NavigationMode::Sequential => {
                    target_idx == current + 1
                        && self.forward_gate_passes(&self.config.sections[current])
                }
            };

        if allowed {
            self.view = View::Section(target_idx);
            tracing::debug!(section = %target, "Form section changed");
        }
        allowed
    }

    /// Advances a wizard to the next step, if the gate allows it.
    pub fn next(&mut self) -> bool {
        let View::Section(current) = self.view else {
            return false;
        };
        match self.config.sections.get(current + 1) {
            Some(next) => {
                let id = next.id.clone();
                self.navigate(&id)
            }
            None => false,
        }
    }

    /// Steps back one section.
    pub fn back(&mut self) -> bool {
        match self.view {
            View::Section(current) if current > 0 => {
                self.view = View::Section(current - 1);
                true
            }
            _ => false,
        }
    }

    /// Assembles the request payload for `flow` from the current values.
    #[must_use]
    pub fn payload(&self, flow: Flow) -> Payload {
        let card_number = normalize_card_number(self.value(Field::CardNumber));
        let expiry_month = self.value(Field::ExpiryMonth).to_owned();
        let expiry_year = self.value(Field::ExpiryYear).to_owned();
        let cvv = self.value(Field::Cvv).to_owned();

        match flow.action() {
            Some(action) => {
                let with_pin = flow == Flow::PersonalizePin;
                Payload::FormData(FormData {
                    card_number,
                    expiry_month,
                    expiry_year,
                    cvv,
                    new_pin: with_pin.then(|| self.value(Field::NewPin).to_owned()),
                    confirm_pin: with_pin.then(|| self.value(Field::ConfirmPin).to_owned()),
                    action,
                })
            }
            None => Payload::CardData(CardData {
                card_number,
                expiry_month,
                expiry_year,
                cvv,
            }),
        }
    }

    /// Enters the terminal success view. A denied form stays denied.
    pub fn succeed(&mut self) {
        if self.view != View::Denied {
            self.view = View::Success;
        }
    }

    /// Enters the terminal access-denied view.
    pub fn deny(&mut self) {
        self.view = View::Denied;
    }

    /// Back to the first section with every value cleared. A denied form
    /// only loses its values.
    pub fn reset(&mut self) {
        self.values.clear();
        if self.view != View::Denied {
            self.view = View::Section(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn fixed_today() -> Date {
        date!(2026 - 10 - 19)
    }

    fn gift_card() -> FormStateMachine {
        FormStateMachine::new(FormConfig::gift_card())
            .unwrap()
            .with_clock(fixed_today)
    }

    fn wizard() -> FormStateMachine {
        FormStateMachine::new(FormConfig::redemption_wizard())
            .unwrap()
            .with_clock(fixed_today)
    }

    fn fill_card(form: &mut FormStateMachine) {
        form.set_field(Field::CardNumber, "4111 1111 1111 1111").unwrap();
        assert_eq!(
            form.set_field(Field::ExpiryMonth, "11"),
            Err(FieldError::ExpiryIncomplete)
        );
        form.set_field(Field::ExpiryYear, "2026").unwrap();
        form.set_field(Field::Cvv, "123").unwrap();
    }

    fn section(form: &FormStateMachine) -> &str {
        &form.current_section().unwrap().id().0
    }

    #[test]
    fn rejects_empty_and_duplicate_configs() {
        assert!(FormStateMachine::new(FormConfig::new(NavigationMode::Free)).is_err());
        let duplicated = FormConfig::new(NavigationMode::Free)
            .with_section(SectionSpec::new("a"))
            .with_section(SectionSpec::new("a"));
        assert!(matches!(FormStateMachine::new(duplicated), Err(Error::Config(_))));
    }

    #[test]
    fn starts_on_first_section() {
        let form = gift_card();
        assert_eq!(form.view(), View::Section(0));
        assert_eq!(section(&form), "check");
        assert!(!form.can_submit());
    }

    #[test]
    fn free_navigation_switches_anywhere() {
        let mut form = gift_card();
        assert!(form.navigate(&"personalize".into()));
        assert_eq!(section(&form), "personalize");
        assert!(form.navigate(&"check".into()));
        assert!(form.navigate(&"register".into()));
        assert_eq!(section(&form), "register");
    }

    #[test]
    fn unknown_section_is_a_no_op() {
        let mut form = gift_card();
        assert!(!form.navigate(&"nowhere".into()));
        assert_eq!(section(&form), "check");
    }

    #[test]
    fn submit_requires_every_section_field() {
        let mut form = gift_card();
        fill_card(&mut form);
        assert!(form.can_submit());

        form.set_field(Field::Cvv, "12").unwrap_err();
        assert!(!form.can_submit());
        assert_eq!(
            form.section_errors(),
            vec![(Field::Cvv, FieldError::CvvLength { expected: 3 })]
        );
    }

    #[test]
    fn personalize_also_needs_pins() {
        let mut form = gift_card();
        fill_card(&mut form);
        form.navigate(&"personalize".into());
        assert!(!form.can_submit());

        form.set_field(Field::NewPin, "1234").unwrap();
        assert_eq!(
            form.set_field(Field::ConfirmPin, "1235"),
            Err(FieldError::PinMismatch)
        );
        assert!(!form.can_submit());

        form.set_field(Field::ConfirmPin, "1234").unwrap();
        assert!(form.can_submit());
    }

    #[test]
    fn gift_card_ignores_brand_lengths() {
        let mut form = gift_card();
        // Amex prefix, but the gift card rule is a flat 16 digits.
        assert_eq!(
            form.set_field(Field::CardNumber, "378282246310005"),
            Err(FieldError::CardNumberLength { expected: 16 })
        );
        assert_eq!(form.card_brand(), CardBrand::Unknown);
    }

    #[test]
    fn wizard_brand_drives_lengths() {
        let mut form = wizard();
        assert_eq!(form.set_field(Field::CardNumber, "3782 822463 10005"), Ok(()));
        assert_eq!(form.card_brand(), CardBrand::Amex);
        assert_eq!(
            form.set_field(Field::Cvv, "123"),
            Err(FieldError::CvvLength { expected: 4 })
        );

        // Changing the number re-derives the brand; stale CVV now fits Visa.
        form.set_field(Field::CardNumber, "4111111111111111").unwrap();
        assert_eq!(form.card_brand(), CardBrand::Visa);
        assert_eq!(form.validate_field(Field::Cvv), Ok(()));
    }

    #[test]
    fn wizard_forward_moves_are_gated() {
        let mut form = wizard();
        assert!(!form.next());
        assert!(!form.navigate(&"details".into()));
        assert_eq!(section(&form), "card");

        form.set_field(Field::CardNumber, "4111111111111111").unwrap();
        assert!(!form.navigate(&"review".into()), "cannot skip a step");
        assert!(form.next());
        assert_eq!(section(&form), "details");

        assert!(!form.next());
        let _ = form.set_field(Field::ExpiryMonth, "10");
        form.set_field(Field::ExpiryYear, "2026").unwrap();
        form.set_field(Field::Cvv, "123").unwrap();
        assert!(form.next());
        assert_eq!(section(&form), "review");
        assert!(form.can_submit());
        assert_eq!(form.submission_flow(), Some(Flow::Redeem));
    }

    #[test]
    fn wizard_backward_always_allowed() {
        let mut form = wizard();
        form.set_field(Field::CardNumber, "4111111111111111").unwrap();
        form.next();
        form.set_field(Field::CardNumber, "4111").unwrap_err();
        assert!(form.back());
        assert_eq!(section(&form), "card");
        assert!(!form.back());
    }

    #[test]
    fn custom_forward_gate() {
        let config = FormConfig::new(NavigationMode::Sequential)
            .with_section(
                SectionSpec::new("terms").with_forward_gate(|form| form.value(Field::Cvv) == "ok"),
            )
            .with_section(SectionSpec::new("done"));
        let mut form = FormStateMachine::new(config).unwrap();
        assert!(!form.next());
        form.set_field(Field::Cvv, "ok").unwrap_err();
        assert!(form.next());
    }

    #[test]
    fn terminal_views_ignore_navigation() {
        let mut form = gift_card();
        form.succeed();
        assert!(form.view().is_terminal());
        assert!(!form.navigate(&"register".into()));
        assert!(form.current_section().is_none());
        assert!(!form.can_submit());

        form.deny();
        assert!(!form.back());
        assert_eq!(form.view(), View::Denied);
        form.succeed();
        assert_eq!(form.view(), View::Denied);
    }

    #[test]
    fn reset_clears_values() {
        let mut form = gift_card();
        fill_card(&mut form);
        form.navigate(&"register".into());
        form.succeed();

        form.reset();
        assert_eq!(form.view(), View::Section(0));
        assert_eq!(form.value(Field::CardNumber), "");
        assert!(!form.can_submit());
    }

    #[test]
    fn reset_keeps_denied_form_denied() {
        let mut form = gift_card();
        fill_card(&mut form);
        form.deny();

        form.reset();
        assert_eq!(form.view(), View::Denied);
        assert_eq!(form.value(Field::Cvv), "");
    }

    #[test]
    fn payload_shapes() {
        let mut form = gift_card();
        fill_card(&mut form);
        form.set_field(Field::NewPin, "1234").unwrap();
        form.set_field(Field::ConfirmPin, "1234").unwrap();

        let Payload::FormData(data) = form.payload(Flow::CheckBalance) else {
            panic!("expected formData");
        };
        assert_eq!(data.card_number, "4111111111111111");
        assert_eq!(data.new_pin, None);

        let Payload::FormData(data) = form.payload(Flow::PersonalizePin) else {
            panic!("expected formData");
        };
        assert_eq!(data.new_pin.as_deref(), Some("1234"));
        assert_eq!(data.confirm_pin.as_deref(), Some("1234"));

        assert!(matches!(form.payload(Flow::Redeem), Payload::CardData(_)));
    }
}
