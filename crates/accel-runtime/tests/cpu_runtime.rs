//! End-to-end tests for the host runtime through the `Runtime` trait

use accel_runtime::{
    BorrowingLiteral, CompileOptions, ComputationBuilder, CpuConfig, CpuRuntime, DeviceId, ElementType,
    ExecuteOptions, HostBuffer, HostBufferSemantics, Literal, Runtime, RuntimeError, Shape,
};

fn upload(runtime: &CpuRuntime, device: DeviceId, literal: &Literal) -> Box<dyn accel_runtime::DeviceBuffer> {
    let device = runtime.lookup_device(device).unwrap();
    runtime
        .buffer_from_host_buffer(
            HostBuffer::copied(&literal.to_bytes()),
            literal.shape(),
            HostBufferSemantics::ImmutableOnlyDuringCall,
            device.as_ref(),
        )
        .unwrap()
}

#[test]
fn test_untupled_results() -> Result<(), RuntimeError> {
    let runtime = CpuRuntime::new(CpuConfig::default())?;
    let device = runtime.lookup_device(DeviceId(0))?;

    let mut builder = ComputationBuilder::new("sum_and_diff");
    let x = builder.parameter(0, Shape::array(ElementType::S32, vec![3]))?;
    let y = builder.parameter(1, Shape::array(ElementType::S32, vec![3]))?;
    let sum = builder.add(x, y)?;
    let diff = builder.sub(x, y)?;
    let root = builder.tuple(&[sum, diff])?;
    let executable = runtime.compile(&builder.build(root)?, &CompileOptions::default())?;

    let a = upload(&runtime, DeviceId(0), &Literal::vec1(&[5i32, 6, 7]));
    let b = upload(&runtime, DeviceId(0), &Literal::vec1(&[1i32, 2, 3]));

    let options = ExecuteOptions {
        untuple_result: true,
        strict_shape_checking: false,
    };
    let results = executable.execute_portable(&[a.as_ref(), b.as_ref()], device.as_ref(), &options)?;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].to_literal_sync()?.to_vec::<i32>()?, vec![6, 8, 10]);
    assert_eq!(results[1].to_literal_sync()?.to_vec::<i32>()?, vec![4, 4, 4]);

    let tupled = executable.execute_portable(&[a.as_ref(), b.as_ref()], device.as_ref(), &ExecuteOptions::default())?;
    assert_eq!(tupled.len(), 1);
    assert!(tupled[0].on_device_shape().is_tuple());
    Ok(())
}

#[test]
fn test_argument_on_wrong_device() -> Result<(), RuntimeError> {
    let runtime = CpuRuntime::new(CpuConfig::default().with_device_count(2))?;
    let device1 = runtime.lookup_device(DeviceId(1))?;

    let mut builder = ComputationBuilder::new("neg");
    let x = builder.parameter(0, Shape::scalar(ElementType::F64))?;
    let n = builder.neg(x)?;
    let executable = runtime.compile(&builder.build(n)?, &CompileOptions::default())?;

    let on_device0 = upload(&runtime, DeviceId(0), &Literal::scalar(1.5f64));
    let err = executable
        .execute_portable(&[on_device0.as_ref()], device1.as_ref(), &ExecuteOptions::default())
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidArgument(_)));

    let copied = on_device0.copy_to_device(device1.as_ref())?;
    assert_eq!(copied.device_id(), DeviceId(1));
    let results = executable.execute_portable(&[copied.as_ref()], device1.as_ref(), &ExecuteOptions::default())?;
    assert_eq!(results[0].to_literal_sync()?.get_first_element::<f64>()?, -1.5);
    Ok(())
}

#[test]
fn test_argument_count_and_shape_checked() -> Result<(), RuntimeError> {
    let runtime = CpuRuntime::new(CpuConfig::default())?;
    let device = runtime.lookup_device(DeviceId(0))?;

    let mut builder = ComputationBuilder::new("abs");
    let x = builder.parameter(0, Shape::array(ElementType::F32, vec![2]))?;
    let a = builder.abs(x)?;
    let executable = runtime.compile(&builder.build(a)?, &CompileOptions::default())?;

    assert!(executable
        .execute_portable(&[], device.as_ref(), &ExecuteOptions::default())
        .is_err());

    let wrong = upload(&runtime, DeviceId(0), &Literal::vec1(&[1.0f32, 2.0, 3.0]));
    assert!(executable
        .execute_portable(&[wrong.as_ref()], device.as_ref(), &ExecuteOptions::default())
        .is_err());
    Ok(())
}

#[test]
fn test_deleted_argument_rejected() -> Result<(), RuntimeError> {
    let runtime = CpuRuntime::new(CpuConfig::default())?;
    let device = runtime.lookup_device(DeviceId(0))?;

    let mut builder = ComputationBuilder::new("id");
    let x = builder.parameter(0, Shape::scalar(ElementType::U32))?;
    let executable = runtime.compile(&builder.build(x)?, &CompileOptions::default())?;

    let buffer = upload(&runtime, DeviceId(0), &Literal::scalar(9u32));
    buffer.delete();
    let err = executable
        .execute_portable(&[buffer.as_ref()], device.as_ref(), &ExecuteOptions::default())
        .unwrap_err();
    assert!(matches!(err, RuntimeError::FailedPrecondition(_)));
    Ok(())
}

#[test]
fn test_infeed_program_outfeed() -> Result<(), RuntimeError> {
    let runtime = CpuRuntime::new(CpuConfig::default())?;
    let device = runtime.lookup_device(DeviceId(0))?;

    let element = Shape::array(ElementType::U8, vec![4]);
    let shape = Shape::tuple(vec![element.clone(), Shape::scalar(ElementType::F32)]);
    let mut builder = ComputationBuilder::new("echo");
    let value = builder.infeed(shape.clone())?;
    let done = builder.outfeed(value)?;
    let executable = runtime.compile(&builder.build(done)?, &CompileOptions::default())?;

    let bytes = [1u8, 2, 3, 4];
    let scalar = 2.5f32.to_ne_bytes();
    let literal = BorrowingLiteral::from_pieces(vec![&bytes[..], &scalar[..]], &shape)?;
    device.transfer_to_infeed(&literal)?;

    let options = ExecuteOptions {
        untuple_result: true,
        strict_shape_checking: false,
    };
    let results = executable.execute_portable(&[], device.as_ref(), &options)?;
    assert!(results.is_empty());

    let mut out = Literal::new(shape).unwrap();
    device.transfer_from_outfeed(&mut out)?;
    assert_eq!(out.pieces()[0], bytes.to_vec());
    assert_eq!(out.pieces()[1], scalar.to_vec());
    Ok(())
}

#[test]
fn test_synchronous_runtime_surfaces_execution_errors() -> Result<(), RuntimeError> {
    let runtime = CpuRuntime::new(CpuConfig::default().with_asynchronous(false))?;
    let device = runtime.lookup_device(DeviceId(0))?;

    let mut builder = ComputationBuilder::new("div");
    let x = builder.constant(Literal::scalar(1u16));
    let zero = builder.constant(Literal::scalar(0u16));
    let q = builder.div(x, zero)?;
    let executable = runtime.compile(&builder.build(q)?, &CompileOptions::default())?;

    let err = executable
        .execute_portable(&[], device.as_ref(), &ExecuteOptions::default())
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Execution(_)));
    Ok(())
}

#[test]
fn test_compile_rejects_column_major_layout() -> Result<(), RuntimeError> {
    let runtime = CpuRuntime::new(CpuConfig::default())?;
    let mut builder = ComputationBuilder::new("id");
    let x = builder.parameter(0, Shape::array(ElementType::F32, vec![2, 2]))?;
    let computation = builder.build(x)?;

    let options = CompileOptions {
        argument_layouts: Some(vec![Shape::array(ElementType::F32, vec![2, 2])
            .with_layout(accel_runtime::Layout { minor_to_major: vec![0, 1] })]),
        ..CompileOptions::default()
    };
    assert!(matches!(
        runtime.compile(&computation, &options),
        Err(RuntimeError::Compilation(_))
    ));
    Ok(())
}

#[test]
fn test_dropping_argument_after_launch_keeps_result() -> Result<(), RuntimeError> {
    let runtime = CpuRuntime::new(CpuConfig::default())?;
    let device = runtime.lookup_device(DeviceId(0))?;

    let mut builder = ComputationBuilder::new("double");
    let x = builder.parameter(0, Shape::array(ElementType::S64, vec![4]))?;
    let y = builder.add(x, x)?;
    let executable = runtime.compile(&builder.build(y)?, &CompileOptions::default())?;

    let input = upload(&runtime, DeviceId(0), &Literal::vec1(&[1i64, 2, 3, 4]));
    let results = executable.execute_portable(&[input.as_ref()], device.as_ref(), &ExecuteOptions::default())?;
    input.delete();
    drop(input);

    assert_eq!(results[0].to_literal_sync()?.to_vec::<i64>()?, vec![2, 4, 6, 8]);
    Ok(())
}

#[test]
fn test_deleted_argument_freed_when_launch_finishes() -> Result<(), RuntimeError> {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let runtime = CpuRuntime::new(CpuConfig::default())?;
    let device = runtime.lookup_device(DeviceId(0))?;
    let shape = Shape::array(ElementType::F32, vec![2]);

    // The launch holds its argument until the infeed value arrives
    let mut builder = ComputationBuilder::new("add_infeed");
    let x = builder.parameter(0, shape.clone())?;
    let fed = builder.infeed(shape.clone())?;
    let sum = builder.add(x, fed)?;
    let executable = runtime.compile(&builder.build(sum)?, &CompileOptions::default())?;

    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    let bytes: Vec<u8> = [1.0f32, 2.0].iter().flat_map(|v| v.to_ne_bytes()).collect();
    let host = HostBuffer::new(
        Arc::from(bytes),
        accel_runtime::DoneToken::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let input = runtime.buffer_from_host_buffer(host, &shape, HostBufferSemantics::ImmutableZeroCopy, device.as_ref())?;

    let results = executable.execute_portable(&[input.as_ref()], device.as_ref(), &ExecuteOptions::default())?;
    input.delete();

    let increment: Vec<u8> = [10.0f32, 20.0].iter().flat_map(|v| v.to_ne_bytes()).collect();
    device.transfer_to_infeed(&BorrowingLiteral::new(&increment, &shape)?)?;
    assert_eq!(results[0].to_literal_sync()?.to_vec::<f32>()?, vec![11.0, 22.0]);

    // Host memory goes back as soon as the launch is done with it, not when
    // the handle is finally dropped
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(input.is_deleted());
    drop(input);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    Ok(())
}
