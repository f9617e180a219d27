use net::ServerEvent;

/// Event kinds a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GameState,
    InitialNpcStates,
    NpcStates,
    PlayerJoined,
    PlayerLeft,
    PlayerUpdate,
    PlayerLeftMap,
    PlayerAttack,
    NpcMovementInstruction,
    NpcUpdate,
    Error,
    /// Local event: the socket went away.
    Disconnect,
}

/// What handlers receive.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Server(ServerEvent),
    Disconnect,
}

impl GatewayEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Disconnect => EventKind::Disconnect,
            Self::Server(event) => match event {
                ServerEvent::GameState { .. } => EventKind::GameState,
                ServerEvent::InitialNpcStates { .. } => EventKind::InitialNpcStates,
                ServerEvent::NpcStates { .. } => EventKind::NpcStates,
                ServerEvent::PlayerJoined { .. } => EventKind::PlayerJoined,
                ServerEvent::PlayerLeft { .. } => EventKind::PlayerLeft,
                ServerEvent::PlayerUpdate { .. } => EventKind::PlayerUpdate,
                ServerEvent::PlayerLeftMap { .. } => EventKind::PlayerLeftMap,
                ServerEvent::PlayerAttack { .. } => EventKind::PlayerAttack,
                ServerEvent::NpcMovementInstruction { .. } => EventKind::NpcMovementInstruction,
                ServerEvent::NpcUpdate { .. } => EventKind::NpcUpdate,
                ServerEvent::Error { .. } => EventKind::Error,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub type Handler = Box<dyn FnMut(&GatewayEvent) + Send>;

struct Subscription {
    id: SubscriptionId,
    /// `None` receives every event.
    kind: Option<EventKind>,
    handler: Handler,
}

/// Handler table. Handlers run in subscription order.
#[derive(Default)]
pub struct Subscriptions {
    next_id: u64,
    entries: Vec<Subscription>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: Option<EventKind>, handler: Handler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push(Subscription { id, kind, handler });
        id
    }

    pub fn on(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&GatewayEvent) + Send + 'static,
    ) -> SubscriptionId {
        self.push(Some(kind), Box::new(handler))
    }

    pub fn on_any(&mut self, handler: impl FnMut(&GatewayEvent) + Send + 'static) -> SubscriptionId {
        self.push(None, Box::new(handler))
    }

    /// Returns false if the id was not subscribed.
    pub fn off(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|s| s.id != id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every matching handler. Returns how many ran.
    pub fn dispatch(&mut self, event: &GatewayEvent) -> usize {
        let kind = event.kind();
        let mut ran = 0;
        for sub in &mut self.entries {
            if sub.kind.is_none() || sub.kind == Some(kind) {
                (sub.handler)(event);
                ran += 1;
            }
        }
        ran
    }
}
