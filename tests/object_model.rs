// Reference counting and capability queries through the public API.

use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vk_rhi::interface::{DataBlob, EngineFactory, FileStream, SeekOrigin};
use vk_rhi::object::IID_OBJECT;
use vk_rhi::{Interface, InterfaceId, Object, RefPtr};

trait Widget: Object {
    fn label(&self) -> &str;
}

impl Interface for dyn Widget {
    const IID: InterfaceId = InterfaceId::from_u128(0x9E3A1F44_6B2D_4C71_8A55_0D7C3E9B2F18);
}

const IID_GADGET: InterfaceId = InterfaceId::from_u128(0x41C0FFEE_0000_4000_8000_0000DEADBEEF);

struct WidgetImpl {
    label: String,
    destroyed: Arc<AtomicUsize>,
}

impl Object for WidgetImpl {}

impl Widget for WidgetImpl {
    fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for WidgetImpl {
    fn drop(&mut self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out widgets that share one destruction counter per label.
struct WidgetFactory;

impl WidgetFactory {
    fn create_pair(&self) -> ((RefPtr<dyn Widget>, Arc<AtomicUsize>), (RefPtr<dyn Widget>, Arc<AtomicUsize>)) {
        (self.create("a"), self.create("b"))
    }

    fn create(&self, label: &str) -> (RefPtr<dyn Widget>, Arc<AtomicUsize>) {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let widget = RefPtr::with_capabilities(
            WidgetImpl {
                label: label.to_string(),
                destroyed: destroyed.clone(),
            },
            vk_rhi::capabilities!(WidgetImpl { dyn Widget }),
        );
        (RefPtr::map(widget, |w| w as &(dyn Widget + 'static)), destroyed)
    }
}

#[test]
fn test_add_ref_then_release_twice_destroys_only_a() {
    let ((a, a_destroyed), (b, b_destroyed)) = WidgetFactory.create_pair();

    assert_eq!(RefPtr::add_ref(&a), 2);
    assert_eq!(unsafe { RefPtr::release(&a) }, 1);
    assert_eq!(a_destroyed.load(Ordering::SeqCst), 0);

    // Still alive: unsupported identities answer None without touching the count
    assert!(a.query_interface(&IID_GADGET).is_none());
    assert_eq!(RefPtr::ref_count(&a), 1);

    // The second release gives up the reference the handle itself held
    let a = ManuallyDrop::new(a);
    assert_eq!(unsafe { RefPtr::release(&*a) }, 0);
    assert_eq!(a_destroyed.load(Ordering::SeqCst), 1);

    assert_eq!(b_destroyed.load(Ordering::SeqCst), 0);
    assert_eq!(RefPtr::ref_count(&b), 1);
    assert_eq!(b.label(), "b");
    drop(b);
    assert_eq!(b_destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_base_identity_round_trip() {
    let (widget, destroyed) = WidgetFactory.create("round-trip");

    let base = widget
        .query_interface(&IID_OBJECT)
        .and_then(|p| p.downcast::<dyn Object>().ok())
        .expect("every object answers to the base identity");
    assert_eq!(RefPtr::ref_count(&widget), 2);

    drop(widget);
    let again = base.query::<dyn Widget>().expect("capabilities survive the base view");
    assert_eq!(again.label(), "round-trip");
    drop(base);
    drop(again);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_factory_objects_are_independent() {
    let factory = vk_rhi::get_engine_factory_vk();
    let a = factory.create_data_blob(16);
    let b = factory.create_data_blob(16);
    assert!(!RefPtr::ptr_eq(&a, &b));

    RefPtr::add_ref(&a);
    assert_eq!(RefPtr::ref_count(&a), 2);
    assert_eq!(unsafe { RefPtr::release(&a) }, 1);
    assert_eq!(RefPtr::ref_count(&b), 1);

    // A blob is not a stream
    assert!(a.query::<dyn FileStream>().is_none());
    assert_eq!(RefPtr::ref_count(&a), 1);

    let stream = factory.create_memory_file_stream(b.clone());
    assert!(stream.set_pos(8, SeekOrigin::Start));
    assert!(stream.write(&[0xAB; 8]));
    assert_eq!(b.size(), 16);
    assert_eq!(a.to_vec(), vec![0; 16]);
}

#[test]
fn test_factory_answers_generic_and_vulkan_identities() {
    let factory = vk_rhi::get_engine_factory_vk();
    let generic = factory.query::<dyn EngineFactory>().expect("generic factory");
    assert!(RefPtr::ptr_eq(&generic, &factory));
    assert!(factory.query::<dyn DataBlob>().is_none());
    assert_eq!(
        <dyn vk_rhi::backend::EngineFactoryVk as Interface>::IID.to_string(),
        "{F554EEE4-57C2-4637-A508-85BE80DC657C}"
    );
}
