//! The program declaration tree: an immutable, shared description of
//! every event, machine, state, transition, and foreign type a process
//! instantiates instances from. Built once by the host (or a test's
//! [`ProgramBuilder`]) and never mutated after [`ProgramBuilder::build`]
//! assigns every declaration its index.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::HandlerFn;
use crate::value::{
    EventIndex, ForeignOps, ForeignTypeIndex, FunIndex, MachineDeclIndex, StateIndex, Type,
};

/// A packed bitmap over event declaration indices — used for defer sets,
/// trigger sets, and receive case sets, all of which are tested far more
/// often than they're built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventSet {
    words: Vec<u64>,
}

impl EventSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, event: EventIndex) {
        let (word, bit) = Self::locate(event);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << bit;
    }

    pub fn contains(&self, event: EventIndex) -> bool {
        let (word, bit) = Self::locate(event);
        self.words.get(word).map(|w| w & (1 << bit) != 0).unwrap_or(false)
    }

    pub fn union_with(&mut self, other: &EventSet) {
        if self.words.len() < other.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (i, w) in other.words.iter().enumerate() {
            self.words[i] |= w;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    fn locate(event: EventIndex) -> (usize, u32) {
        ((event / 64) as usize, event % 64)
    }

    pub fn from_iter(events: impl IntoIterator<Item = EventIndex>) -> Self {
        let mut set = Self::new();
        for e in events {
            set.insert(e);
        }
        set
    }
}

#[derive(Debug, Clone)]
pub struct EventDecl {
    pub decl_index: EventIndex,
    pub name: String,
    pub payload_type: Type,
    /// `0` means unbounded, matching `MachineDecl::max_queue_size`.
    pub max_instances: u32,
}

/// Callbacks the host registers for one foreign type declaration. Stored
/// as trait objects so the host can close over arbitrary native state
/// (an FFI handle table, a pool, etc.) without this crate knowing about
/// the concrete foreign type.
#[derive(Clone)]
pub struct ForeignTypeDecl {
    pub decl_index: ForeignTypeIndex,
    pub name: String,
    pub clone_fn: Arc<dyn Fn(&dyn Any) -> Box<dyn Any + Send + Sync> + Send + Sync>,
    pub free_fn: Arc<dyn Fn(Box<dyn Any + Send + Sync>) + Send + Sync>,
    pub equals_fn: Arc<dyn Fn(&dyn Any, &dyn Any) -> bool + Send + Sync>,
    pub default_fn: Arc<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>,
}

impl std::fmt::Debug for ForeignTypeDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignTypeDecl")
            .field("decl_index", &self.decl_index)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct TransDecl {
    pub owner_state_index: StateIndex,
    pub trigger_event: EventIndex,
    pub dest_state_index: StateIndex,
    pub trans_fun: Option<FunIndex>,
}

#[derive(Debug, Clone)]
pub struct DoDecl {
    pub owner_state_index: StateIndex,
    pub trigger_event: EventIndex,
    pub do_fun: FunIndex,
}

#[derive(Debug, Clone)]
pub struct ReceiveCase {
    pub trigger_event: EventIndex,
    pub fun: FunIndex,
}

#[derive(Debug, Clone)]
pub struct ReceiveDecl {
    pub case_set: EventSet,
    pub cases: Vec<ReceiveCase>,
}

pub struct FunDecl {
    pub name: String,
    pub implementation: HandlerFn,
    pub num_parameters: u32,
    pub max_num_locals: u32,
    pub payload_type: Type,
    pub locals_type: Vec<Type>,
    pub receives: Vec<ReceiveDecl>,
}

impl std::fmt::Debug for FunDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunDecl")
            .field("name", &self.name)
            .field("num_parameters", &self.num_parameters)
            .field("max_num_locals", &self.max_num_locals)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct StateDecl {
    pub name: String,
    pub entry_fun: Option<FunIndex>,
    pub exit_fun: Option<FunIndex>,
    pub defers_set: EventSet,
    pub trans_set: EventSet,
    pub do_set: EventSet,
    pub transitions: Vec<TransDecl>,
    pub dos: Vec<DoDecl>,
}

impl StateDecl {
    pub fn transition_for(&self, event: EventIndex) -> Option<&TransDecl> {
        self.transitions.iter().find(|t| t.trigger_event == event)
    }

    pub fn do_for(&self, event: EventIndex) -> Option<&DoDecl> {
        self.dos.iter().find(|d| d.trigger_event == event)
    }
}

#[derive(Debug)]
pub struct MachineDecl {
    pub decl_index: MachineDeclIndex,
    pub name: String,
    pub vars: Vec<VarDecl>,
    pub states: Vec<StateDecl>,
    pub funs: Vec<FunDecl>,
    pub init_state_index: StateIndex,
    /// `0` means unbounded.
    pub max_queue_size: u32,
}

/// The immutable, shared declaration tree a process instantiates from.
#[derive(Debug)]
pub struct Program {
    pub events: Vec<EventDecl>,
    pub machines: Vec<MachineDecl>,
    pub foreign_types: Vec<ForeignTypeDecl>,
    /// `(creator machine decl index, symbolic child name)` -> the
    /// concrete machine definition name `MkMachine` resolves to.
    pub link_map: HashMap<(MachineDeclIndex, String), String>,
    /// Concrete machine definition name -> its declaration index.
    pub machine_def_map: HashMap<String, MachineDeclIndex>,
}

impl Program {
    /// Resolves `MkMachine`'s symbolic-name form: looks up the link map
    /// entry for `(creator, symbolic_name)` and then the concrete
    /// definition by name.
    pub fn resolve_linked_machine(
        &self,
        creator: MachineDeclIndex,
        symbolic_name: &str,
    ) -> Option<MachineDeclIndex> {
        let concrete = self
            .link_map
            .get(&(creator, symbolic_name.to_string()))?;
        self.machine_def_map.get(concrete).copied()
    }

    pub fn machine_by_name(&self, name: &str) -> Option<MachineDeclIndex> {
        self.machine_def_map.get(name).copied()
    }

    pub fn event_by_name(&self, name: &str) -> Option<EventIndex> {
        self.events.iter().find(|e| e.name == name).map(|e| e.decl_index)
    }
}

impl ForeignOps for Program {
    fn foreign_clone(&self, decl: ForeignTypeIndex, data: &dyn Any) -> Box<dyn Any + Send + Sync> {
        (self.foreign_types[decl as usize].clone_fn)(data)
    }

    fn foreign_free(&self, decl: ForeignTypeIndex, data: Box<dyn Any + Send + Sync>) {
        (self.foreign_types[decl as usize].free_fn)(data)
    }

    fn foreign_equals(&self, decl: ForeignTypeIndex, a: &dyn Any, b: &dyn Any) -> bool {
        (self.foreign_types[decl as usize].equals_fn)(a, b)
    }

    fn foreign_default(&self, decl: ForeignTypeIndex) -> Box<dyn Any + Send + Sync> {
        (self.foreign_types[decl as usize].default_fn)()
    }
}

/// Assembles a [`Program`], assigning declaration indices by construction
/// order the way a compiler front end would. Exists so tests and small
/// embedding hosts can build a program without hand-indexing every
/// declaration themselves.
#[derive(Default)]
pub struct ProgramBuilder {
    events: Vec<EventDecl>,
    machines: Vec<MachineDecl>,
    foreign_types: Vec<ForeignTypeDecl>,
    link_map: HashMap<(MachineDeclIndex, String), String>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event(&mut self, name: impl Into<String>, payload_type: Type, max_instances: u32) -> EventIndex {
        let decl_index = self.events.len() as EventIndex;
        self.events.push(EventDecl { decl_index, name: name.into(), payload_type, max_instances });
        decl_index
    }

    pub fn add_foreign_type(&mut self, decl: ForeignTypeDecl) -> ForeignTypeIndex {
        let decl_index = self.foreign_types.len() as ForeignTypeIndex;
        let mut decl = decl;
        decl.decl_index = decl_index;
        self.foreign_types.push(decl);
        decl_index
    }

    pub fn add_machine(&mut self, mut decl: MachineDecl) -> MachineDeclIndex {
        let decl_index = self.machines.len() as MachineDeclIndex;
        decl.decl_index = decl_index;
        self.machines.push(decl);
        decl_index
    }

    pub fn link(&mut self, creator: MachineDeclIndex, symbolic_name: impl Into<String>, concrete: impl Into<String>) {
        self.link_map.insert((creator, symbolic_name.into()), concrete.into());
    }

    pub fn build(self) -> Program {
        let machine_def_map = self
            .machines
            .iter()
            .map(|m| (m.name.clone(), m.decl_index))
            .collect();
        Program {
            events: self.events,
            machines: self.machines,
            foreign_types: self.foreign_types,
            link_map: self.link_map,
            machine_def_map,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_set_tracks_sparse_indices() {
        let mut set = EventSet::new();
        set.insert(0);
        set.insert(200);
        assert!(set.contains(0));
        assert!(set.contains(200));
        assert!(!set.contains(1));
        assert!(!set.contains(199));
    }

    #[test]
    fn event_set_union() {
        let mut a = EventSet::from_iter([1, 5]);
        let b = EventSet::from_iter([5, 9]);
        a.union_with(&b);
        assert!(a.contains(1));
        assert!(a.contains(5));
        assert!(a.contains(9));
    }

    #[test]
    fn builder_assigns_indices_by_order() {
        let mut builder = ProgramBuilder::new();
        let e0 = builder.add_event("Ping", Type::Any, 0);
        let e1 = builder.add_event("Pong", Type::Any, 0);
        assert_eq!(e0, 0);
        assert_eq!(e1, 1);
    }
}
