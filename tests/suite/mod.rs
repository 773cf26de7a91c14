mod events;
mod lifecycle;
mod reconcile;
mod workspace;
