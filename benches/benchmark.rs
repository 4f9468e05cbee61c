use criterion::{criterion_group, criterion_main, Criterion};
use smithay_planes::{
    backend::{
        allocator::BufferHandle,
        planes::{
            dummy::{DummyBufferManager, DummyModes, DummyRegisters},
            BlendMode, DeviceTopology, LogicalLayer, Pipe, PlaneManager, PlaneType, ZOrderConfig,
        },
    },
    utils::{Rectangle, Transform},
};

fn frame(manager: &mut PlaneManager<DummyRegisters, DummyBufferManager, DummyModes>, types: &[PlaneType], buffer: u64) {
    manager.settle_reclaimed();
    manager.reclaim_pipe(Pipe::PRIMARY);

    let mut config: ZOrderConfig = types.iter().copied().map(LogicalLayer::new).collect();
    if let Ok(planes) = manager.assign(Pipe::PRIMARY, &mut config) {
        for (i, plane) in planes.into_iter().enumerate() {
            let offset = i as i32 * 64;
            let _ = manager.set_geometry(
                plane,
                Rectangle::from_loc_and_size((offset, offset), (512, 512)),
                Rectangle::from_loc_and_size((0, 0), (512, 512)),
                Transform::Normal,
                0xff,
                BlendMode::Premultiplied,
            );
            let _ = manager.set_buffer(plane, BufferHandle(buffer * 8 + i as u64));
        }
        let _ = manager.program(Pipe::PRIMARY);
    }

    manager.disable_reclaimed();
    manager.registers_mut().vblank();
}

fn criterion_benchmark(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    c.bench_function("PlaneManager stable frame", |b| {
        let mut manager = PlaneManager::new(
            DeviceTopology::reference(),
            DummyRegisters::new().with_disable_latency(1),
            DummyBufferManager::new(),
            DummyModes::new(),
        )
        .unwrap();
        let types = [PlaneType::Sprite, PlaneType::Overlay, PlaneType::Sprite];
        let mut buffer = 0;
        b.iter(|| {
            buffer = (buffer + 1) % 2;
            frame(&mut manager, &types, buffer)
        })
    });

    c.bench_function("PlaneManager changing stacks", |b| {
        let mut manager = PlaneManager::new(
            DeviceTopology::reference(),
            DummyRegisters::new().with_disable_latency(1),
            DummyBufferManager::new(),
            DummyModes::new(),
        )
        .unwrap();
        let stacks: [&[PlaneType]; 3] = [
            &[PlaneType::Sprite, PlaneType::Sprite, PlaneType::Sprite, PlaneType::Sprite],
            &[PlaneType::Overlay, PlaneType::Sprite, PlaneType::Cursor],
            &[PlaneType::Sprite, PlaneType::Overlay, PlaneType::Overlay, PlaneType::Sprite],
        ];
        let mut frame_count = 0u64;
        b.iter(|| {
            frame_count += 1;
            frame(&mut manager, stacks[(frame_count % 3) as usize], frame_count % 4)
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
