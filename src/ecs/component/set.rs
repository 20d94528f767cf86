use crate::{
    all_tuples,
    ecs::component::{Cache, Component, Id, IntoSignature},
};

/// A destination that can receive type-erased component values, one call
/// per component (`spec.md` §6: constructing a new entity or a
/// `CommandBuffer` entry from a typed value or tuple of values).
pub trait Target {
    fn apply<C: Component>(&mut self, id: Id, value: C);
}

/// A set of component values owned by a single entity: either one
/// component or a tuple of components. [`Values::apply`] walks the set,
/// registering (or looking up) each type's id and handing the value to a
/// [`Target`] one component at a time.
pub trait Values: IntoSignature + Sized + 'static {
    fn apply<T: Target>(self, cache: &Cache, target: &mut T);
}

impl<C: Component> Values for C {
    fn apply<T: Target>(self, cache: &Cache, target: &mut T) {
        target.apply::<C>(cache.register_generic::<C>(), self);
    }
}

impl Values for () {
    fn apply<T: Target>(self, _cache: &Cache, _target: &mut T) {}
}

macro_rules! tuple_values {
    ($($name: ident),*) => {
        impl<$($name: Values),*> Values for ($($name,)*) {
            #[allow(non_snake_case)]
            fn apply<CT: Target>(self, cache: &Cache, target: &mut CT) {
                let ( $($name,)* ) = self;
                $(<$name as Values>::apply($name, cache, target);)*
            }
        }
    }
}

all_tuples!(tuple_values);
