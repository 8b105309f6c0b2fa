use wgpu::util::DeviceExt;
use winit::{
    application::ApplicationHandler, dpi::{
        LogicalSize, Size, PhysicalSize
    }, event::{
        ElementState, WindowEvent
    }, event_loop::{
        EventLoop
    }, window::Window, keyboard::{PhysicalKey, KeyCode}
};

use clap::{clap_app, crate_version};

use tamaputer::*;

#[repr(C)]
#[derive(Default, Debug, Clone, Copy)]
struct Vertex {
    position:   [f32; 2],
    tex_coord:  [f32; 2]
}

unsafe impl bytemuck::Zeroable for Vertex {}
unsafe impl bytemuck::Pod for Vertex {}

// Window scale over the logical framebuffer.
const WINDOW_SCALE: usize = 4;

fn frame_time() -> chrono::Duration {
    chrono::Duration::milliseconds((1000 / FRAMERATE) as i64)
}

struct WindowState {
    window:         std::sync::Arc<Window>,
    surface:        wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
}

impl WindowState {
    fn resize_surface(&mut self, size: PhysicalSize<u32>, device: &wgpu::Device) {
        self.surface_config.width = size.width;
        self.surface_config.height = size.height;
        self.surface.configure(device, &self.surface_config);
    }
}

struct App {
    window: Option<WindowState>,
    tama:   Tamaputer,

    // WGPU params
    instance:        wgpu::Instance,
    adapter:         wgpu::Adapter,
    device:          wgpu::Device,
    queue:           wgpu::Queue,
    texture_extent:  wgpu::Extent3d,
    texture:         wgpu::Texture,
    bind_group:      wgpu::BindGroup,
    vertex_buffer:   wgpu::Buffer,
    render_pipeline: wgpu::RenderPipeline,

    screen_buffer: Vec<u8>,
    last_frame_time: chrono::DateTime<chrono::Utc>,

    #[cfg(feature = "audio")]
    audio_stream: cpal::Stream
}

impl App {
    fn new(tama: Tamaputer) -> Self {
        #[cfg(feature = "audio")]
        let mut tama = tama;

        // Setup wgpu
        let instance = wgpu::Instance::new(&Default::default());

        let adapter = futures::executor::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            force_fallback_adapter: false,
            compatible_surface: None,
        })).expect("Failed to find appropriate adapter");

        let (device, queue) = futures::executor::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            ..Default::default()
        })).expect("Failed to create device");

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: None,
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None
                },
            ]
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: None,
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[]
        });

        let texture_extent = wgpu::Extent3d {
            width: FRAME_WIDTH as u32,
            height: FRAME_HEIGHT as u32,
            depth_or_array_layers: 1
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: None,
            size: texture_extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[wgpu::TextureFormat::Rgba8UnormSrgb]
        });
        let texture_view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter:     wgpu::FilterMode::Nearest,
            min_filter:     wgpu::FilterMode::Nearest,
            mipmap_filter:  wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&texture_view)
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler)
                }
            ],
            label: None
        });

        let vertices = vec![
            Vertex{position: [-1.0, -1.0], tex_coord: [0.0, 1.0]},
            Vertex{position: [1.0, -1.0], tex_coord: [1.0, 1.0]},
            Vertex{position: [-1.0, 1.0], tex_coord: [0.0, 0.0]},
            Vertex{position: [1.0, 1.0], tex_coord: [1.0, 0.0]},
        ];

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: None,
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX
        });

        let shader_module = device.create_shader_module(wgpu::include_wgsl!("./shaders/shader.wgsl"));

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: None,
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader_module,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute {
                            format: wgpu::VertexFormat::Float32x2,
                            offset: 0,
                            shader_location: 0,
                        },
                        wgpu::VertexAttribute {
                            format: wgpu::VertexFormat::Float32x2,
                            offset: 4 * 2,
                            shader_location: 1,
                        },
                    ]
                }],
                compilation_options: Default::default()
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                .. Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Bgra8UnormSrgb,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default()
            }),
            multiview: None,
            cache: None
        });

        #[cfg(feature = "audio")]
        let audio_stream = make_audio_stream(&mut tama);

        Self {
            window: None,
            tama,

            instance,
            adapter,
            device,
            queue,
            texture_extent,
            texture,
            bind_group,
            vertex_buffer,
            render_pipeline,

            screen_buffer: vec![0_u8; FRAME_BUFFER_SIZE],
            last_frame_time: chrono::Utc::now(),

            #[cfg(feature = "audio")]
            audio_stream
        }
    }

    fn set_key(&mut self, code: KeyCode, pressed: bool) {
        match code {
            KeyCode::ArrowLeft                  => self.tama.set_key(Keys::LEFT, pressed),
            KeyCode::ArrowRight                 => self.tama.set_key(Keys::RIGHT, pressed),
            KeyCode::Space | KeyCode::Enter     => self.tama.set_key(Keys::MIDDLE, pressed),
            KeyCode::KeyS                       => self.tama.set_key(Keys::SAVE, pressed),
            KeyCode::KeyP                       => self.tama.set_key(Keys::PAUSE, pressed),
            KeyCode::KeyH                       => self.tama.set_key(Keys::HELP, pressed),
            _ => {},
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        let window_attrs = Window::default_attributes()
            .with_inner_size(Size::Logical(LogicalSize{
                width: (FRAME_WIDTH * WINDOW_SCALE) as f64,
                height: (FRAME_HEIGHT * WINDOW_SCALE) as f64
            }))
            .with_title("Tamaputer");
        let window = std::sync::Arc::new(event_loop.create_window(window_attrs).unwrap());

        let surface = self.instance.create_surface(window.clone()).expect("Failed to create surface");

        let size = window.inner_size();
        let surface_config = surface.get_default_config(&self.adapter, size.width, size.height).expect("Could not get default surface config");
        surface.configure(&self.device, &surface_config);

        self.window = Some(WindowState {
            window, surface, surface_config
        });

        self.last_frame_time = chrono::Utc::now();

        #[cfg(feature = "audio")]
        {
            use cpal::traits::StreamTrait;
            self.audio_stream.play().expect("Couldn't start audio stream");
        }
    }

    fn window_event(
            &mut self,
            event_loop: &winit::event_loop::ActiveEventLoop,
            _window_id: winit::window::WindowId,
            event: WindowEvent,
        ) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            },
            WindowEvent::Resized(size) => {
                self.window.as_mut().unwrap().resize_surface(size, &self.device);
            },
            WindowEvent::RedrawRequested => {
                let now = chrono::Utc::now();
                if now.signed_duration_since(self.last_frame_time) >= frame_time() {
                    self.last_frame_time = now;

                    self.tama.frame(&mut self.screen_buffer);

                    self.queue.write_texture(
                        self.texture.as_image_copy(),
                        &self.screen_buffer,
                        wgpu::TexelCopyBufferLayout {
                            offset: 0,
                            bytes_per_row: Some(4 * self.texture_extent.width),
                            rows_per_image: None,
                        },
                        self.texture_extent
                    );

                    let frame = self.window.as_ref().unwrap().surface.get_current_texture().expect("Timeout when acquiring next swapchain tex.");
                    let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {label: None});

                    {
                        let view = frame.texture.create_view(&Default::default());
                        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                            label: None,
                            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                                view: &view,
                                ops: wgpu::Operations {
                                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                                    store: wgpu::StoreOp::Store,
                                },
                                resolve_target: None,
                            })],
                            depth_stencil_attachment: None,
                            ..Default::default()
                        });
                        rpass.set_pipeline(&self.render_pipeline);
                        rpass.set_bind_group(0, &self.bind_group, &[]);
                        rpass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
                        rpass.draw(0..4, 0..1);
                    }

                    self.queue.submit([encoder.finish()]);
                    frame.present();
                }
                self.window.as_ref().unwrap().window.request_redraw();
            },
            WindowEvent::KeyboardInput { device_id: _, event, is_synthetic: _ } => {
                let pressed = match event.state {
                    ElementState::Pressed => true,
                    ElementState::Released => false,
                };
                if let PhysicalKey::Code(code) = event.physical_key {
                    self.set_key(code, pressed);
                }
            }
            _ => {}
        }
    }
}

fn main() {
    env_logger::init();

    let app = clap_app!(tamaputer =>
        (version: crate_version!())
        (about: "Virtual pet handheld shell.")
        (@arg ROM: "The path to the ROM image to load.")
        (@arg packed: -p "Treat the ROM image as the packed 3-byte layout.")
        (@arg save: -s +takes_value "Save-state file path.")
    );

    let cmd_args = app.get_matches();

    let rom_path = match cmd_args.value_of("ROM") {
        Some(r) => r.to_string(),
        None => panic!("Usage: tamaputer [rom path]. Run with --help for more options."),
    };

    let format = if cmd_args.is_present("packed") {
        RomFormat::Packed
    } else {
        RomFormat::NibblePairs
    };

    // A bad image is fatal before the core is ever constructed.
    let rom = match WordRom::load(&rom_path, format) {
        Ok(rom) => rom,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let save_path = match cmd_args.value_of("save") {
        Some(s) => s.to_string(),
        None => make_save_name(&rom_path),
    };

    let mut tama = Tamaputer::new(
        Box::new(StubCore::new(rom)),
        Box::new(FileStorage::new(save_path))
    );
    tama.load_saved_state();

    let event_loop = EventLoop::new().expect("Failed to create event loop");

    let mut app = App::new(tama);
    event_loop.set_control_flow(winit::event_loop::ControlFlow::Poll);
    event_loop.run_app(&mut app).unwrap();
}

fn make_save_name(rom_name: &str) -> String {
    match rom_name.rfind('.') {
        Some(pos) => rom_name[0..pos].to_string() + ".state",
        None      => rom_name.to_string() + ".state"
    }
}

#[cfg(feature = "audio")]
fn make_audio_stream(tama: &mut Tamaputer) -> cpal::Stream {
    use cpal::traits::{
        DeviceTrait,
        HostTrait
    };

    let host = cpal::default_host();
    let device = host.default_output_device().expect("no output device available.");

    let config = device.default_output_config().expect("no default output config");
    let sample_rate = config.sample_rate().0 as f64;
    let mut audio_handler = tama.enable_audio(sample_rate);

    device.build_output_stream(
        &config.into(),
        move |data: &mut [f32], _| {
            audio_handler.get_audio_packet(data);
        },
        move |err| {
            log::warn!("audio stream error: {}", err);
        },
        None
    ).unwrap()
}

// Stand-in for the external emulator core. Instruction emulation is not part
// of this crate; this exercises the full HAL surface so the shell can be run
// on its own. A real core links in by implementing EmulatorCore.
struct StubCore {
    rom:        WordRom,
    state:      CpuState,
    buttons:    [bool; 3],
    tone_on:    bool,
}

impl StubCore {
    fn new(rom: WordRom) -> Self {
        StubCore {
            rom,
            state:      CpuState::new(),
            buttons:    [false; 3],
            tone_on:    false,
        }
    }
}

impl EmulatorCore for StubCore {
    fn step(&mut self, hal: &mut dyn Hal) {
        let len = self.rom.len().max(1);
        let word = self.rom.words().get(self.state.pc as usize % len).copied().unwrap_or(0);
        self.state.pc = (self.state.pc + 1) & 0x1FFF;
        self.state.tick_counter = self.state.tick_counter.wrapping_add(1);

        // Scatter ROM content over the matrix so progress is visible.
        if self.state.tick_counter % 128 == 0 {
            let x = (word & 0x1F) as u8;
            let y = ((word >> 5) & 0xF) as u8;
            hal.set_lcd_matrix(x, y, word & 0x800 != 0);
        }

        for (i, &level) in self.buttons.iter().enumerate() {
            hal.set_lcd_icon(i as u8, level);
        }

        if self.buttons[1] != self.tone_on {
            self.tone_on = self.buttons[1];
            hal.set_frequency(4096);
            hal.play_frequency(self.tone_on);
        }
    }

    fn set_button(&mut self, button: Button, pressed: bool) {
        self.buttons[button as usize] = pressed;
    }

    fn state(&self) -> CpuState {
        self.state.clone()
    }

    fn load_state(&mut self, state: &CpuState) {
        self.state = state.clone();
    }

    fn refresh_hw(&mut self) {}
}
