//! Node command-line flags, and the rules that broadcast one setting over many nodes.
//!
//! A [`Flags`] value is a list of named [`FlagRule`]s. Resolving it for node `i` of the
//! targeted set produces that node's [`FlagSet`], which renders to command-line tokens.

use std::collections::BTreeMap;
use std::fmt;

use derive_more::Display;

/// The name of a node flag. The common ones are spelled out, anything else is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlagName {
    Port,
    RpcPort,
    WsPort,
    ValidatorPort,
    Validator,
    Bootnodes,
    PublicAddr,
    PublicValidatorAddresses,
    UnitCreationDelay,
    Execution,
    Pruning,
    NoMdns,
    MaxNonfinalizedBlocks,
    Other(String),
}

impl FlagName {
    /// Accepts `snake_case`, `kebab-case` and `--kebab-case` spellings.
    pub fn parse(name: &str) -> Self {
        let normalized = name.trim_start_matches('-').replace('-', "_");
        match normalized.as_str() {
            "port" => FlagName::Port,
            "rpc_port" => FlagName::RpcPort,
            "ws_port" => FlagName::WsPort,
            "validator_port" => FlagName::ValidatorPort,
            "validator" => FlagName::Validator,
            "bootnodes" => FlagName::Bootnodes,
            "public_addr" => FlagName::PublicAddr,
            "public_validator_addresses" => FlagName::PublicValidatorAddresses,
            "unit_creation_delay" => FlagName::UnitCreationDelay,
            "execution" => FlagName::Execution,
            "pruning" => FlagName::Pruning,
            "no_mdns" => FlagName::NoMdns,
            "max_nonfinalized_blocks" => FlagName::MaxNonfinalizedBlocks,
            _ => FlagName::Other(normalized),
        }
    }

    /// The `snake_case` spelling.
    pub fn as_str(&self) -> &str {
        match self {
            FlagName::Port => "port",
            FlagName::RpcPort => "rpc_port",
            FlagName::WsPort => "ws_port",
            FlagName::ValidatorPort => "validator_port",
            FlagName::Validator => "validator",
            FlagName::Bootnodes => "bootnodes",
            FlagName::PublicAddr => "public_addr",
            FlagName::PublicValidatorAddresses => "public_validator_addresses",
            FlagName::UnitCreationDelay => "unit_creation_delay",
            FlagName::Execution => "execution",
            FlagName::Pruning => "pruning",
            FlagName::NoMdns => "no_mdns",
            FlagName::MaxNonfinalizedBlocks => "max_nonfinalized_blocks",
            FlagName::Other(name) => name,
        }
    }

    /// The `--kebab-case` spelling passed to the binary.
    pub fn to_cli(&self) -> String {
        format!("--{}", self.as_str().replace('_', "-"))
    }
}

impl fmt::Display for FlagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().replace('_', "-"))
    }
}

impl From<&str> for FlagName {
    fn from(name: &str) -> Self {
        FlagName::parse(name)
    }
}

impl From<String> for FlagName {
    fn from(name: String) -> Self {
        FlagName::parse(&name)
    }
}

/// The value one node carries for a flag.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum FlagValue {
    /// The flag is present without a value.
    #[display(fmt = "<marker>")]
    Marker,
    #[display(fmt = "{}", _0)]
    Value(String),
}

/// Numerical setting that differs per node: `Seq(30334)` gives node 0 `30334`, node 1 `30335`
/// and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seq(pub i64);

/// How a single setting expands over the nodes it is applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagRule {
    Marker,
    Scalar(String),
    Seq(i64),
    /// Node `i` takes `values[i]`; nodes past the end of the list take `fallback`, or are left
    /// untouched when there is none.
    PerNode {
        values: Vec<String>,
        fallback: Option<String>,
    },
}

impl FlagRule {
    pub fn scalar(value: impl ToString) -> Self {
        FlagRule::Scalar(value.to_string())
    }

    pub fn per_node<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        FlagRule::PerNode {
            values: values.into_iter().map(|v| v.to_string()).collect(),
            fallback: None,
        }
    }

    /// Sets the value used past the end of a per-node list. Other rules are returned unchanged.
    pub fn with_fallback(self, value: impl ToString) -> Self {
        match self {
            FlagRule::PerNode { values, .. } => FlagRule::PerNode {
                values,
                fallback: Some(value.to_string()),
            },
            other => other,
        }
    }

    /// The value node `index` of the targeted set receives, if any.
    pub fn resolve(&self, index: usize) -> Option<FlagValue> {
        match self {
            FlagRule::Marker => Some(FlagValue::Marker),
            FlagRule::Scalar(value) => Some(FlagValue::Value(value.clone())),
            FlagRule::Seq(base) => Some(FlagValue::Value((base + index as i64).to_string())),
            FlagRule::PerNode { values, fallback } => values
                .get(index)
                .or(fallback.as_ref())
                .map(|v| FlagValue::Value(v.clone())),
        }
    }
}

impl From<Seq> for FlagRule {
    fn from(seq: Seq) -> Self {
        FlagRule::Seq(seq.0)
    }
}

impl From<&str> for FlagRule {
    fn from(value: &str) -> Self {
        FlagRule::Scalar(value.to_string())
    }
}

impl From<String> for FlagRule {
    fn from(value: String) -> Self {
        FlagRule::Scalar(value)
    }
}

impl From<Vec<String>> for FlagRule {
    fn from(values: Vec<String>) -> Self {
        FlagRule::PerNode {
            values,
            fallback: None,
        }
    }
}

macro_rules! scalar_rule_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FlagRule {
                fn from(value: $t) -> Self {
                    FlagRule::Scalar(value.to_string())
                }
            }
        )*
    };
}

scalar_rule_from!(u16, u32, u64, usize, i32, i64);

/// An ordered list of flag rules, applied together to a set of nodes. Later rules for the same
/// name win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    rules: Vec<(FlagName, FlagRule)>,
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a flag without a value.
    pub fn marker(mut self, name: impl Into<FlagName>) -> Self {
        self.rules.push((name.into(), FlagRule::Marker));
        self
    }

    pub fn set(mut self, name: impl Into<FlagName>, rule: impl Into<FlagRule>) -> Self {
        self.rules.push((name.into(), rule.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &(FlagName, FlagRule)> {
        self.rules.iter()
    }

    /// The flags node `index` of the targeted set receives.
    pub fn resolve(&self, index: usize) -> FlagSet {
        let mut set = FlagSet::default();
        for (name, rule) in &self.rules {
            if let Some(value) = rule.resolve(index) {
                set.insert(name.clone(), value);
            }
        }
        set
    }
}

/// The concrete flags of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet(BTreeMap<FlagName, FlagValue>);

impl FlagSet {
    pub fn insert(&mut self, name: FlagName, value: FlagValue) -> Option<FlagValue> {
        self.0.insert(name, value)
    }

    pub fn remove(&mut self, name: &FlagName) -> Option<FlagValue> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &FlagName) -> Option<&FlagValue> {
        self.0.get(name)
    }

    /// The value of a valued flag; `None` for markers and absent flags.
    pub fn value(&self, name: &FlagName) -> Option<&str> {
        match self.0.get(name) {
            Some(FlagValue::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, name: &FlagName) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn merge(&mut self, other: FlagSet) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlagName, &FlagValue)> {
        self.0.iter()
    }

    /// Renders the set as binary arguments. Values containing spaces become several tokens.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.0.len() * 2);
        for (name, value) in &self.0 {
            args.push(name.to_cli());
            if let FlagValue::Value(value) = value {
                if value.contains(' ') {
                    args.extend(value.split_whitespace().map(str::to_string));
                } else {
                    args.push(value.clone());
                }
            }
        }
        args
    }
}
