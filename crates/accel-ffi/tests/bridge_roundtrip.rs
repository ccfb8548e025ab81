//! Drives the bridge the way a host environment would: terms in, terms out

use accel_ffi::{call, clear_all_registries, get_version, HostBinary, Term};
use accel_runtime::{ComputationBuilder, ElementType, Shape};
use serial_test::serial;

fn ok(term: Term) -> Term {
    match term.ok_value() {
        Some(value) => value.clone(),
        None => panic!("expected {{ok, _}}, got {term}"),
    }
}

fn f32s(values: &[f32]) -> Term {
    Term::binary(bytemuck::cast_slice::<f32, u8>(values).to_vec())
}

fn read_f32s(buffer: &Term) -> Vec<f32> {
    let bytes = ok(call("read_device_mem", &[buffer.clone(), Term::Int(-1)]));
    bytes
        .as_binary()
        .unwrap()
        .as_bytes()
        .chunks_exact(4)
        .map(|chunk| f32::from_ne_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// A host client with two synchronous devices and a `{f32[2]} * {f32[2]}`
/// program compiled for `replicas` replicas
fn setup(replicas: i64) -> (Term, Term, Term) {
    clear_all_registries();
    let client = ok(call("get_host_client", &[Term::Int(2), Term::atom("false")]));
    let vector = ok(call(
        "make_shape",
        &[Term::atom("f32"), Term::Tuple(vec![Term::Int(2)])],
    ));

    let shape = Shape::array(ElementType::F32, vec![2]);
    let mut builder = ComputationBuilder::new("mul");
    let x = builder.parameter(0, shape.clone()).unwrap();
    let y = builder.parameter(1, shape).unwrap();
    let product = builder.mul(x, y).unwrap();
    let bytes = builder.build(product).unwrap().to_bytes().unwrap();
    let computation = ok(call("register_computation", &[Term::binary(bytes)]));

    let executable = ok(call(
        "compile",
        &[
            client.clone(),
            computation,
            Term::List(vec![vector.clone(), vector.clone()]),
            Term::Int(replicas),
            Term::Int(1),
            Term::Int(-1),
            Term::atom("false"),
        ],
    ));
    (client, vector, executable)
}

#[test]
#[serial]
fn test_run_with_payloads_and_buffers() {
    let (client, vector, executable) = setup(1);
    let input = ok(call(
        "binary_to_device_mem",
        &[client, f32s(&[2.0, 3.0]), vector.clone(), Term::Int(0)],
    ));

    let payload = HostBinary::from(bytemuck::cast_slice::<f32, u8>(&[4.0, 5.0]));
    let arguments = Term::List(vec![Term::List(vec![
        input.clone(),
        Term::Tuple(vec![Term::Binary(payload.clone()), vector]),
    ])]);
    let results = ok(call("run", &[executable, arguments, Term::Int(-1)]));

    let replicas = results.as_list().unwrap();
    assert_eq!(replicas.len(), 1);
    let [buffers, device] = replicas[0].as_tuple().unwrap() else {
        panic!("expected {{Buffers, DeviceId}}");
    };
    assert_eq!(device, &Term::Int(0));
    assert_eq!(read_f32s(&buffers.as_list().unwrap()[0]), vec![8.0, 15.0]);

    // The temporary device copy of the payload is gone once the run returns
    assert_eq!(payload.pin_count(), 0);
    // The argument buffer is untouched
    assert_eq!(read_f32s(&input), vec![2.0, 3.0]);
}

#[test]
#[serial]
fn test_replicated_run_uses_each_device() {
    let (client, vector, executable) = setup(2);
    let on_second = ok(call(
        "binary_to_device_mem",
        &[client, f32s(&[2.0, 2.0]), vector.clone(), Term::Int(1)],
    ));

    let arguments = Term::List(vec![
        Term::List(vec![
            Term::Tuple(vec![f32s(&[1.0, 2.0]), vector.clone()]),
            Term::Tuple(vec![f32s(&[3.0, 4.0]), vector.clone()]),
        ]),
        Term::List(vec![on_second, Term::Tuple(vec![f32s(&[5.0, 5.0]), vector])]),
    ]);
    let results = ok(call("run_replicated", &[executable.clone(), arguments.clone(), Term::Int(-1)]));

    let replicas = results.as_list().unwrap();
    assert_eq!(replicas.len(), 2);
    let expected = [(0, vec![3.0, 8.0]), (1, vec![10.0, 10.0])];
    for (replica, (device, values)) in replicas.iter().zip(expected) {
        let items = replica.as_tuple().unwrap();
        assert_eq!(items[1], Term::Int(device));
        assert_eq!(read_f32s(&items[0].as_list().unwrap()[0]), values);
    }

    // Pinning a device is refused for a multi-replica program
    let reply = call("run_replicated", &[executable, arguments, Term::Int(0)]);
    assert!(reply.error_message().unwrap().contains("cannot pin a device"));
}

#[test]
#[serial]
fn test_single_mode_run_checks_replica_count() {
    let (_client, vector, executable) = setup(2);
    let one_row = Term::List(vec![Term::List(vec![
        Term::Tuple(vec![f32s(&[1.0, 1.0]), vector.clone()]),
        Term::Tuple(vec![f32s(&[1.0, 1.0]), vector.clone()]),
    ])]);
    let reply = call("run", &[executable.clone(), one_row, Term::Int(-1)]);
    assert!(reply.error_message().unwrap().contains("has 2 replicas"));

    // With every row present, only replica 0 runs, on the pinned device
    let row = Term::List(vec![
        Term::Tuple(vec![f32s(&[6.0, 7.0]), vector.clone()]),
        Term::Tuple(vec![f32s(&[2.0, 2.0]), vector.clone()]),
    ]);
    let results = ok(call("run", &[executable, Term::List(vec![row.clone(), row]), Term::Int(1)]));
    let replicas = results.as_list().unwrap();
    assert_eq!(replicas.len(), 1);
    let items = replicas[0].as_tuple().unwrap();
    assert_eq!(items[1], Term::Int(1));
    assert_eq!(read_f32s(&items[0].as_list().unwrap()[0]), vec![12.0, 14.0]);
}

#[test]
#[serial]
fn test_handles_fail_after_client_release() {
    let (client, vector, executable) = setup(1);
    let buffer = ok(call(
        "binary_to_device_mem",
        &[client.clone(), f32s(&[1.0, 1.0]), vector, Term::Int(0)],
    ));

    assert_eq!(call("release_resource", &[client]), Term::ok(Term::atom("true")));

    let reply = call("read_device_mem", &[buffer.clone(), Term::Int(-1)]);
    assert_eq!(
        reply.error_message(),
        Some("the client that created this handle has been released")
    );
    let reply = call("run", &[executable, Term::List(vec![Term::List(vec![])]), Term::Int(-1)]);
    assert_eq!(
        reply.error_message(),
        Some("the client that created this handle has been released")
    );

    // Freeing still works without the client
    assert_eq!(call("deallocate_device_mem", &[buffer]), Term::ok_atom());
}

#[test]
#[serial]
fn test_version_and_leak_free_teardown() {
    let version = ok(call("get_version", &[]));
    assert_eq!(version.as_text(), Some(get_version().as_str()));
    assert!(get_version().split('.').count() >= 3);

    let (client, vector, _executable) = setup(1);
    let buffer = ok(call(
        "binary_to_device_mem",
        &[client, f32s(&[1.0, 2.0]), vector, Term::Int(0)],
    ));
    assert_eq!(call("deallocate_device_mem", &[buffer]), Term::ok_atom());

    assert_eq!(call("clear_all_registries", &[]), Term::ok_atom());
    assert!(accel_ffi::registry_sizes().iter().all(|(_, live)| *live == 0));
}
