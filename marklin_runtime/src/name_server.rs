//! Name service (§4.2): maps short printable names to task identifiers.
//!
//! Names are first-come: the first task to `register_as` a name owns it for
//! the life of the process. A second registration of the same name by a
//! different task is rejected; a task re-registering its own name is a
//! harmless no-op (this is not specified explicitly and is recorded as a
//! resolved ambiguity in the design ledger).

use std::collections::HashMap;
use std::thread;

use marklin_common::ids::TaskId;
use marklin_common::error::{MarklinError, MarklinResult};

use crate::ipc::{channel, Mailbox, ServerEndpoint};

enum Request {
    RegisterAs(String),
    WhoIs(String),
}

type Reply = MarklinResult<Option<TaskId>>;

/// Client handle to the name service, freely cloneable and shareable across
/// tasks/threads.
#[derive(Clone)]
pub struct NameServerHandle {
    mailbox: Mailbox<Request, Reply>,
}

impl NameServerHandle {
    /// `RegisterAs(name)`. Fails with [`MarklinError::AlreadyReserved`] if the
    /// name is already owned by a different task.
    pub fn register_as(&self, me: TaskId, name: &str) -> MarklinResult<()> {
        match self.mailbox.call(me, Request::RegisterAs(name.to_string())) {
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// `WhoIs(name)`. Fails with [`MarklinError::NotFound`] if nobody has
    /// registered that name yet.
    pub fn who_is(&self, me: TaskId, name: &str) -> MarklinResult<TaskId> {
        match self.mailbox.call(me, Request::WhoIs(name.to_string())) {
            Ok(Some(tid)) => Ok(tid),
            Ok(None) => Err(MarklinError::NotFound),
            Err(e) => Err(e),
        }
    }
}

/// Spawn the name server's event loop thread and return a client handle to it.
pub fn spawn() -> NameServerHandle {
    let (mailbox, endpoint) = channel();
    thread::Builder::new()
        .name("name_server".into())
        .spawn(move || run(endpoint))
        .expect("failed to spawn name_server thread");
    NameServerHandle { mailbox }
}

fn run(endpoint: ServerEndpoint<Request, Reply>) {
    let mut names: HashMap<String, TaskId> = HashMap::new();
    loop {
        let call = endpoint.receive();
        let from = call.from;
        let reply = match &call.request {
            Request::RegisterAs(name) => match names.get(name) {
                Some(owner) if *owner == from => Ok(None),
                Some(_) => Err(MarklinError::AlreadyReserved),
                None => {
                    names.insert(name.clone(), from);
                    Ok(None)
                }
            },
            Request::WhoIs(name) => Ok(names.get(name).copied()),
        };
        call.reply(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_who_is_roundtrips() {
        let server = spawn();
        let me = TaskId(1);
        server.register_as(me, "conductor").unwrap();
        assert_eq!(server.who_is(me, "conductor").unwrap(), me);
    }

    #[test]
    fn who_is_unknown_name_is_not_found() {
        let server = spawn();
        let err = server.who_is(TaskId(1), "nobody").unwrap_err();
        assert_eq!(err, MarklinError::NotFound);
    }

    #[test]
    fn duplicate_registration_by_another_task_is_rejected() {
        let server = spawn();
        server.register_as(TaskId(1), "clock_server").unwrap();
        let err = server.register_as(TaskId(2), "clock_server").unwrap_err();
        assert_eq!(err, MarklinError::AlreadyReserved);
    }

    #[test]
    fn reregistration_by_the_same_task_is_a_no_op() {
        let server = spawn();
        server.register_as(TaskId(1), "io_server").unwrap();
        server.register_as(TaskId(1), "io_server").unwrap();
        assert_eq!(server.who_is(TaskId(1), "io_server").unwrap(), TaskId(1));
    }

    #[test]
    fn names_are_independent() {
        let server = spawn();
        server.register_as(TaskId(1), "a").unwrap();
        server.register_as(TaskId(2), "b").unwrap();
        assert_eq!(server.who_is(TaskId(9), "a").unwrap(), TaskId(1));
        assert_eq!(server.who_is(TaskId(9), "b").unwrap(), TaskId(2));
    }
}
