pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment_details;
pub mod product;
pub mod product_variant;
pub mod shipping_method;
pub mod status;
pub mod store;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use order::{Entity as Order, Model as OrderModel};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment_details::{Entity as PaymentDetails, Model as PaymentDetailsModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use shipping_method::{Entity as ShippingMethod, Model as ShippingMethodModel};
pub use status::{FulfillmentStatus, PaymentStatus};
pub use store::{Entity as Store, Model as StoreModel};
