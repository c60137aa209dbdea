//! Process-wide injectable metadata.
//!
//! Created once per class at module-load (or test-setup) time via the
//! [`injectable`] builder: the class's ordered dependency keys, its
//! construction closure, and the contract traits it can be handed out as.
//! The owner slot is single-assignment per container scope and cleared on
//! container teardown so a class can be reused with a different container.

use crate::error::DiError;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use uuid::Uuid;

pub(crate) type AnyInstance = Arc<dyn Any + Send + Sync>;

/// Casts a concrete `Arc<Impl>` (as `Arc<dyn Any>`) into an `Arc<dyn
/// Contract>` wrapped back in an `Arc<dyn Any>`.
pub(crate) type CasterFn = Arc<dyn Fn(AnyInstance) -> AnyInstance + Send + Sync>;

pub(crate) type FactoryFn = Arc<dyn Fn(&Deps) -> Result<AnyInstance, DiError> + Send + Sync>;

static INJECTABLES: LazyLock<DashMap<TypeId, Arc<InjectableMetadata>>> = LazyLock::new(DashMap::new);

/// Identifies a provider key: a concrete class or a contract trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepKey {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl DepKey {
    pub fn of<P: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<P>(),
            type_name: std::any::type_name::<P>(),
        }
    }
}

/// One per class marked injectable.
pub struct InjectableMetadata {
    /// Unique identity marker.
    pub id: Uuid,
    pub type_id: TypeId,
    pub type_name: &'static str,
    /// Ordered constructor-parameter keys.
    pub deps: Vec<DepKey>,
    pub(crate) factory: FactoryFn,
    pub(crate) casts: HashMap<TypeId, CasterFn>,
    owner: Mutex<Option<Uuid>>,
}

impl InjectableMetadata {
    /// The container currently owning this injectable, if any.
    pub fn owner(&self) -> Option<Uuid> {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Single-assignment: fails when a different container already owns this
    /// class; assigning the same owner again is a no-op.
    pub(crate) fn assign_owner(&self, container: Uuid) -> Result<(), DiError> {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        match *owner {
            Some(existing) if existing != container => Err(DiError::OwnerAlreadyAssigned {
                type_name: self.type_name.to_string(),
            }),
            _ => {
                *owner = Some(container);
                Ok(())
            }
        }
    }

    pub(crate) fn clear_owner(&self, container: Uuid) {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if *owner == Some(container) {
            *owner = None;
        }
    }

    pub(crate) fn caster(&self, contract: TypeId) -> Option<CasterFn> {
        self.casts.get(&contract).cloned()
    }
}

pub(crate) fn injectable_metadata(type_id: TypeId) -> Option<Arc<InjectableMetadata>> {
    INJECTABLES.get(&type_id).map(|m| m.clone())
}

/// Mark `T` injectable and describe how to construct it.
pub fn injectable<T: Send + Sync + 'static>() -> InjectableBuilder<T> {
    InjectableBuilder {
        deps: Vec::new(),
        casts: HashMap::new(),
        _marker: PhantomData,
    }
}

pub struct InjectableBuilder<T: Send + Sync + 'static> {
    deps: Vec<DepKey>,
    casts: HashMap<TypeId, CasterFn>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> InjectableBuilder<T> {
    /// Declare the next constructor parameter. `P` may be a concrete class
    /// or a contract trait object (`dyn Contract`); declaration order is the
    /// parameter order.
    pub fn depends_on<P: ?Sized + 'static>(mut self) -> Self {
        self.deps.push(DepKey::of::<P>());
        self
    }

    /// Declare a contract trait this class can be handed out as. The caster
    /// performs the unsized coercion.
    pub fn provides<C, F>(mut self, caster: F) -> Self
    where
        C: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<C> + Send + Sync + 'static,
    {
        let cast: CasterFn = Arc::new(move |instance: AnyInstance| {
            let concrete = instance
                .downcast::<T>()
                .expect("caster invoked with a foreign instance");
            let contract: Arc<C> = caster(concrete);
            // Wrap the Arc<dyn Contract> so it travels as an Arc<dyn Any>.
            Arc::new(contract)
        });
        self.casts.insert(TypeId::of::<C>(), cast);
        self
    }

    /// Supply the construction closure and publish the metadata.
    pub fn construct<F>(self, factory: F)
    where
        F: Fn(&Deps) -> Result<T, DiError> + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        if INJECTABLES.contains_key(&type_id) {
            // Idempotent: the first registration wins, matching
            // definition-time decorator semantics.
            return;
        }
        let wrapped: FactoryFn = Arc::new(move |deps| {
            let value = factory(deps)?;
            Ok(Arc::new(value) as AnyInstance)
        });
        let meta = Arc::new(InjectableMetadata {
            id: Uuid::new_v4(),
            type_id,
            type_name: std::any::type_name::<T>(),
            deps: self.deps,
            factory: wrapped,
            casts: self.casts,
            owner: Mutex::new(None),
        });
        INJECTABLES.insert(type_id, meta);
    }
}

/// Resolved constructor dependencies, keyed as declared (pre-override).
pub struct Deps<'a> {
    pub(crate) values: &'a HashMap<TypeId, (AnyInstance, Arc<InjectableMetadata>)>,
}

impl Deps<'_> {
    /// A concrete dependency. Not subject to substitution.
    pub fn get<P: Send + Sync + 'static>(&self) -> Result<Arc<P>, DiError> {
        let (instance, _) = self.values.get(&TypeId::of::<P>()).ok_or_else(|| {
            DiError::ProviderNotRegistered {
                type_name: std::any::type_name::<P>().to_string(),
            }
        })?;
        instance
            .clone()
            .downcast::<P>()
            .map_err(|_| DiError::DowncastFailed {
                type_name: std::any::type_name::<P>().to_string(),
            })
    }

    /// A contract dependency: whichever implementation the container bound
    /// (or substituted), handed out through its registered caster.
    pub fn get_as<C: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<C>, DiError> {
        let contract = TypeId::of::<C>();
        let (instance, meta) = self.values.get(&contract).ok_or_else(|| {
            DiError::ProviderNotRegistered {
                type_name: std::any::type_name::<C>().to_string(),
            }
        })?;
        cast_contract::<C>(meta, instance.clone())
    }
}

/// Apply an implementation's caster for `C` and unwrap the double `Arc`.
pub(crate) fn cast_contract<C: ?Sized + Send + Sync + 'static>(
    meta: &InjectableMetadata,
    instance: AnyInstance,
) -> Result<Arc<C>, DiError> {
    let caster = meta
        .caster(TypeId::of::<C>())
        .ok_or_else(|| DiError::DowncastFailed {
            type_name: format!(
                "'{}' does not provide contract '{}'",
                meta.type_name,
                std::any::type_name::<C>()
            ),
        })?;
    let wrapped = caster(instance);
    // The caster returns an Arc<dyn Any> holding an Arc<C>; Arc<C> is Sized.
    let handle = wrapped
        .downcast::<Arc<C>>()
        .map_err(|_| DiError::DowncastFailed {
            type_name: std::any::type_name::<C>().to_string(),
        })?;
    Ok(handle.as_ref().clone())
}
