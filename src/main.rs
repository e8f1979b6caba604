use std::path::Path;

use ash::vk;
use ray_cat::{
    camera::{Camera, CameraSettings},
    config_loader::{CameraPosition, ConfigFileLoader},
    loader::{load_model, triangle_model},
    pipeline::shader_source::SpirvDirectory,
    ref_counted::RefCounted,
    renderer::Renderer,
    scene::{light::Light, ObjectId, Scene},
    time::Time,
    vulkan::{command_pool::CommandPool, context::Context},
    window::{WindowProvider, WinitWindowProvider},
};
use ultraviolet::Vec3;

/// Degrees per second
const SPIN_SPEED: f32 = 20.0;

// Rust will drop these fields in the order they are declared
struct RayCatDemo {
    renderer: Renderer,
    scene: Scene,
    spinning_object: ObjectId,
    camera: Camera,
    time: Time,

    _command_pool: CommandPool,
    context: RefCounted<Context>,

    /// Has to outlive the surface owned by the context
    window: WinitWindowProvider,
}

impl RayCatDemo {
    fn new(config_loader: &mut ConfigFileLoader) -> anyhow::Result<Self> {
        let config = config_loader.get_or_load_config().clone();

        let window =
            WinitWindowProvider::new("Ray Cat", config.window_width, config.window_height)?;
        let context = RefCounted::new(Context::new(Some(&window as &dyn WindowProvider))?);
        let command_pool = CommandPool::new(context.add_ref());

        let model = if Path::new(&config.scene_path).exists() {
            load_model(&command_pool, &config.scene_path)?
        } else {
            log::warn!(
                "Scene {:?} not found, rendering a triangle instead",
                config.scene_path
            );
            triangle_model(&command_pool)
        };

        let mut scene = Scene::new(context.add_ref());
        let spinning_object = scene.add_object(model);
        scene.add_light(Light::Directional {
            direction: Vec3::new(0.2, -1.0, -0.3).normalized(),
            intensity: 0.8,
        });
        scene.add_light(Light::Point {
            position: Vec3::new(0.0, 3.0, 2.0),
            intensity: 5.0,
        });
        scene.commit(&command_pool);

        let renderer = Renderer::new(
            &command_pool,
            window.framebuffer_size(),
            config.present_mode,
            &SpirvDirectory::new(&config.shader_directory),
        );

        let mut camera = Camera::new(CameraSettings::default());
        match config.cached.camera {
            Some(CameraPosition { position, rotation }) => {
                camera.set_translation(position);
                camera.set_rotation(rotation);
            }
            None => camera.set_translation(Vec3::new(0.0, 0.0, 3.0)),
        }
        let vk::Extent2D { width, height } = renderer.extent();
        camera.update_aspect_ratio(width as f32 / height.max(1) as f32);

        Ok(Self {
            renderer,
            scene,
            spinning_object,
            camera,
            time: Time::new(),
            _command_pool: command_pool,
            context,
            window,
        })
    }

    fn main_loop(&mut self) {
        while self.window.process_events() {
            self.time.update();
            let delta_seconds = self.time.delta_seconds();

            self.camera
                .update(delta_seconds, self.window.camera_input());
            self.scene
                .object_mut(self.spinning_object)
                .rotate(Vec3::new(0.0, SPIN_SPEED * delta_seconds, 0.0));

            self.renderer.render(&mut self.scene, &self.camera);
        }
    }

    fn camera_position(&self) -> CameraPosition {
        CameraPosition {
            position: self.camera.position,
            rotation: self.camera.rotation,
        }
    }
}

impl Drop for RayCatDemo {
    fn drop(&mut self) {
        self.context.wait_idle();
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut config_loader = ConfigFileLoader::new("config.json");
    let mut demo = match RayCatDemo::new(&mut config_loader) {
        Ok(demo) => demo,
        Err(err) => {
            log::error!("Could not start: {:#}", err);
            std::process::exit(1);
        }
    };

    demo.main_loop();

    config_loader.get_or_load_config().cached.camera = Some(demo.camera_position());
    drop(demo);
    config_loader.save_config()
}
